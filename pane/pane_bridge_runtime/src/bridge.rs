use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::model::{InboundMessage, ReactiveModel};
use crate::patch::{Patch, Snapshot};
use crate::render_loop::BackgroundMessage;
use crate::session::{ForegroundWaker, ViewId, ViewSession};
use crate::tree::{LayoutEvent, TreeSource};

struct Registration {
    model: ReactiveModel,
    parent: Option<ViewId>,
    session: Rc<dyn ViewSession>,
    /// Changes waiting for the session's next tick, merged in arrival order.
    pending: Option<Patch>,
}

/// Foreground side of a reactive pane.
///
/// Owns the registered views, the authoritative [`Snapshot`] and the
/// lifecycle of the mounted tree. Confined to the foreground thread; the
/// background loop reaches it only through the queue drained by
/// [`PaneBridge::pump`].
pub struct PaneBridge {
    source: Option<TreeSource>,
    lifecycle: Lifecycle,
    registrations: BTreeMap<ViewId, Registration>,
    snapshot: Snapshot,
}

impl PaneBridge {
    pub fn new(
        source: Option<TreeSource>,
        config: BridgeConfig,
        waker: Arc<dyn ForegroundWaker>,
    ) -> Self {
        Self {
            source,
            lifecycle: Lifecycle::new(config, waker),
            registrations: BTreeMap::new(),
            snapshot: Snapshot::new(),
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn is_broken(&self) -> bool {
        self.lifecycle.broken_reason().is_some()
    }

    pub fn model(&self, view: &ViewId) -> Option<&ReactiveModel> {
        self.registrations
            .get(view)
            .map(|registration| &registration.model)
    }

    pub fn parent(&self, view: &ViewId) -> Option<&ViewId> {
        self.registrations
            .get(view)
            .and_then(|registration| registration.parent.as_ref())
    }

    pub fn views(&self) -> impl Iterator<Item = &ViewId> {
        self.registrations.keys()
    }

    /// Records a live view, mounting the tree first if nothing is mounted.
    ///
    /// The returned model carries the full current snapshot as its event so
    /// a late joiner starts in sync.
    pub fn register(
        &mut self,
        view: ViewId,
        parent: Option<ViewId>,
        session: Rc<dyn ViewSession>,
    ) -> Result<&ReactiveModel, BridgeError> {
        if self.lifecycle.state() == LifecycleState::Unmounted {
            if let Some(source) = &self.source {
                self.snapshot = Snapshot::new();
                self.lifecycle.mount(source)?;
            }
        }

        let url = self
            .lifecycle
            .config()
            .import_source_url(session.transport())
            .to_string();
        let model = ReactiveModel::new(url, Patch::full(&self.snapshot));

        tracing::debug!(view = %view, parent = ?parent, "view registered");
        let previous = self.registrations.insert(
            view.clone(),
            Registration {
                model,
                parent,
                session,
                pending: None,
            },
        );
        if previous.is_some() {
            tracing::debug!(view = %view, "replaced existing registration");
        }

        Ok(&self.registrations[&view].model)
    }

    /// Drops a view. The last one to leave tears the tree down.
    pub fn unregister(&mut self, view: &ViewId) -> Result<(), BridgeError> {
        if self.registrations.remove(view).is_none() {
            tracing::debug!(view = %view, "unregister for unknown view");
            return Ok(());
        }
        tracing::debug!(view = %view, "view unregistered");

        if !self.registrations.is_empty() {
            return Ok(());
        }

        let result = self.lifecycle.teardown();
        self.snapshot = Snapshot::new();
        result.map(|_| ())
    }

    /// Applies queued background output: patches update the snapshot and are
    /// delivered to every view, a fault marks the pane broken.
    ///
    /// Returns the number of patches delivered.
    pub fn pump(&mut self) -> Result<usize, BridgeError> {
        let mut delivered = 0;

        for message in self.lifecycle.drain() {
            match message {
                BackgroundMessage::Patch(patch) => {
                    self.deliver(patch)?;
                    delivered += 1;
                }
                BackgroundMessage::Fault(err) => {
                    let reason = err.to_string();
                    tracing::error!(reason = %reason, "pane marked broken");
                    self.lifecycle.mark_broken(reason.clone());
                    return Err(BridgeError::RenderLoopFailed { reason });
                }
            }
        }

        Ok(delivered)
    }

    /// Applies `patch` to the snapshot and hands it to every registered view.
    ///
    /// Interactive views get it on their session's next tick, merged with
    /// anything else that arrives before then. Static views are updated and
    /// pushed right away.
    pub fn deliver(&mut self, patch: Patch) -> Result<(), BridgeError> {
        self.snapshot = patch.apply_to(&self.snapshot)?;

        for (view, registration) in &mut self.registrations {
            if registration.session.is_interactive() {
                match registration.pending.as_mut() {
                    Some(pending) => pending.merge(&patch)?,
                    None => {
                        registration.pending = Some(patch.clone());
                        registration.session.schedule_next_tick(view);
                    }
                }
            } else {
                registration.model.update(patch.clone());
                registration.session.push(view, &registration.model);
            }
        }

        tracing::trace!(path = %patch.path, views = self.registrations.len(), "patch delivered");
        Ok(())
    }

    /// Next-tick callback for an interactive view: applies the merged pending
    /// patch and pushes. Returns `false` when nothing was pending.
    pub fn flush_view(&mut self, view: &ViewId) -> bool {
        let Some(registration) = self.registrations.get_mut(view) else {
            return false;
        };
        let Some(pending) = registration.pending.take() else {
            return false;
        };

        registration.model.update(pending);
        registration.session.push(view, &registration.model);
        true
    }

    /// Handles a `msg` change from the browser.
    ///
    /// An empty payload is ignored. Otherwise the event is scheduled on the
    /// background loop without waiting, and every view's inbound slot is
    /// cleared and pushed so the browser does not resend it. Returns whether
    /// an event was dispatched.
    pub fn on_inbound(
        &mut self,
        view: &ViewId,
        message: InboundMessage,
    ) -> Result<bool, BridgeError> {
        let Some(payload) = message.msg else {
            return Ok(false);
        };
        if !self.registrations.contains_key(view) {
            return Err(BridgeError::UnknownView(view.clone()));
        }

        let dispatched = serde_json::from_value::<LayoutEvent>(payload)
            .map_err(BridgeError::InvalidEvent)
            .and_then(|event| {
                tracing::debug!(view = %view, target = %event.target, "dispatching inbound event");
                self.lifecycle.dispatch(event)
            });

        self.clear_inbound_slots();
        dispatched.map(|()| true)
    }

    /// Swaps the rendered tree. Views are sent a reset patch and the new
    /// tree is mounted straight away when views are registered.
    pub fn replace_tree(&mut self, source: Option<TreeSource>) -> Result<(), BridgeError> {
        let teardown = self.lifecycle.teardown();
        self.source = source;

        let reset = Patch::reset(&self.snapshot);
        if !reset.is_empty() {
            self.deliver(reset)?;
        }
        self.snapshot = Snapshot::new();
        teardown?;

        if !self.registrations.is_empty() {
            if let Some(source) = &self.source {
                self.lifecycle.mount(source)?;
            }
        }

        tracing::info!(views = self.registrations.len(), "component tree replaced");
        Ok(())
    }

    fn clear_inbound_slots(&mut self) {
        for (view, registration) in &mut self.registrations {
            registration.model.msg = None;
            registration.session.push(view, &registration.model);
        }
    }
}
