use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::mpsc;
use tokio::sync::mpsc as async_mpsc;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::loop_runner::{BackgroundLoop, Shutdown, spawn_threaded_event_loop};
use crate::render_loop::{BackgroundMessage, Outbox, panic_error, run_render_loop};
use crate::session::ForegroundWaker;
use crate::tree::{ComponentTree, LayoutEvent, TreeSource};

/// Where the pane's tree is in its mount cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unmounted,
    Mounted,
    /// Held only while `teardown` runs. Teardown is synchronous on the
    /// foreground, so callers observe `Mounted` before and `Unmounted` after.
    TearingDown,
}

struct Mounted {
    tree: Arc<dyn ComponentTree>,
    background: BackgroundLoop,
    inbox: mpsc::Receiver<BackgroundMessage>,
    faults: async_mpsc::UnboundedSender<BridgeError>,
    broken: Option<String>,
}

/// Owns the mounted tree and its background loop.
pub(crate) struct Lifecycle {
    config: BridgeConfig,
    waker: Arc<dyn ForegroundWaker>,
    state: LifecycleState,
    mounted: Option<Mounted>,
}

impl Lifecycle {
    pub(crate) fn new(config: BridgeConfig, waker: Arc<dyn ForegroundWaker>) -> Self {
        Self {
            config,
            waker,
            state: LifecycleState::Unmounted,
            mounted: None,
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.state
    }

    pub(crate) fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub(crate) fn broken_reason(&self) -> Option<&str> {
        self.mounted.as_ref().and_then(|mounted| mounted.broken.as_deref())
    }

    /// Builds a tree from `source` and starts its render loop on a new
    /// background thread. No-op when already mounted.
    pub(crate) fn mount(&mut self, source: &TreeSource) -> Result<(), BridgeError> {
        if self.mounted.is_some() {
            return Ok(());
        }

        let tree = source.build();
        let (tx, inbox) = mpsc::channel();
        let (faults, fault_rx) = async_mpsc::unbounded_channel();
        let outbox = Outbox::new(tx, Arc::clone(&self.waker));

        let loop_tree = Arc::clone(&tree);
        let background = spawn_threaded_event_loop(&self.config.thread_name, move |cancel| {
            run_render_loop(loop_tree, outbox, fault_rx, cancel)
        })?;

        tracing::info!(thread = %background.thread_name(), "component tree mounted");

        self.mounted = Some(Mounted {
            tree,
            background,
            inbox,
            faults,
            broken: None,
        });
        self.state = LifecycleState::Mounted;
        Ok(())
    }

    /// Cancels background work, joins the thread within the configured
    /// bounds and drops the tree. Handles are cleared even when the thread
    /// refuses to stop; that case is returned as an error.
    pub(crate) fn teardown(&mut self) -> Result<Option<Shutdown>, BridgeError> {
        let Some(mounted) = self.mounted.take() else {
            return Ok(None);
        };

        self.state = LifecycleState::TearingDown;
        tracing::info!(thread = %mounted.background.thread_name(), "tearing down component tree");

        let Mounted {
            tree,
            background,
            inbox,
            faults,
            broken: _,
        } = mounted;
        let result = background.shutdown(self.config.join_timeout, self.config.force_join_timeout);

        drop(faults);
        drop(inbox);
        drop(tree);
        self.state = LifecycleState::Unmounted;

        match &result {
            Ok(Shutdown::Graceful) => tracing::info!("component tree unmounted"),
            Ok(Shutdown::Forced) => tracing::warn!("component tree unmounted after forced shutdown"),
            Err(err) => tracing::error!(error = %err, "component tree teardown failed"),
        }

        result.map(Some)
    }

    /// Takes every message the background loop queued so far.
    pub(crate) fn drain(&mut self) -> Vec<BackgroundMessage> {
        self.mounted
            .as_ref()
            .map(|mounted| mounted.inbox.try_iter().collect())
            .unwrap_or_default()
    }

    pub(crate) fn mark_broken(&mut self, reason: String) {
        if let Some(mounted) = self.mounted.as_mut() {
            mounted.broken = Some(reason);
        }
    }

    /// Hands `event` to the background scheduler without waiting for it.
    pub(crate) fn dispatch(&self, event: LayoutEvent) -> Result<(), BridgeError> {
        let mounted = self.mounted.as_ref().ok_or(BridgeError::NotMounted)?;
        if let Some(reason) = &mounted.broken {
            return Err(BridgeError::Broken {
                reason: reason.clone(),
            });
        }

        let tree = Arc::clone(&mounted.tree);
        let faults = mounted.faults.clone();
        let mut cancel = mounted.background.cancel_signal();

        mounted.background.spawn(async move {
            let target = event.target.clone();
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::trace!(target = %target, "dispatch cancelled");
                }
                result = AssertUnwindSafe(tree.dispatch(event)).catch_unwind() => {
                    let result = match result {
                        Ok(result) => result.map_err(BridgeError::from),
                        Err(payload) => Err(panic_error(payload)),
                    };
                    if let Err(err) = result {
                        tracing::error!(target = %target, error = %err, "event dispatch failed");
                        let _ = faults.send(err);
                    }
                }
            }
        });

        Ok(())
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            tracing::error!(error = %err, "component tree leaked on drop");
        }
    }
}
