use async_trait::async_trait;
use pane_bridge_runtime::{ComponentTree, LayoutEvent, RenderOutput, TreeError};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::Notify;

/// Demo tree: a single counter driven by `increment`, `decrement` and
/// `reset` events.
#[derive(Debug, Default)]
pub struct CounterTree {
    count: AtomicI64,
    changed: Notify,
    rendered_once: AtomicBool,
}

impl CounterTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn model(&self) -> RenderOutput {
        let count = self.count.load(Ordering::SeqCst);
        RenderOutput::new(
            "",
            json!({
                "count": count,
                "label": format!("Clicked {count} times"),
                "canDecrement": count > 0,
            }),
        )
    }
}

#[async_trait]
impl ComponentTree for CounterTree {
    async fn render(&self) -> Result<RenderOutput, TreeError> {
        if self.rendered_once.swap(true, Ordering::SeqCst) {
            self.changed.notified().await;
        }
        Ok(self.model())
    }

    async fn dispatch(&self, event: LayoutEvent) -> Result<(), TreeError> {
        match event.target.as_str() {
            "increment" => {
                self.count.fetch_add(1, Ordering::SeqCst);
            }
            "decrement" => {
                let _ = self
                    .count
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                        (count > 0).then(|| count - 1)
                    });
            }
            "reset" => self.count.store(0, Ordering::SeqCst),
            other => {
                // Stale events for handlers that no longer exist are dropped.
                tracing::debug!(target = %other, "no counter handler for event target");
                return Ok(());
            }
        }

        tracing::debug!(target = %event.target, count = self.count.load(Ordering::SeqCst), "counter updated");
        self.changed.notify_one();
        Ok(())
    }
}
