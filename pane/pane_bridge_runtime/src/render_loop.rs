use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::mpsc;
use tokio::sync::mpsc as async_mpsc;

use crate::error::BridgeError;
use crate::loop_runner::CancelSignal;
use crate::patch::{Patch, Snapshot};
use crate::session::ForegroundWaker;
use crate::tree::{ComponentTree, TreeScope};

/// What the background loop hands to the foreground.
#[derive(Debug)]
pub(crate) enum BackgroundMessage {
    Patch(Patch),
    Fault(BridgeError),
}

/// Background-to-foreground hand-off: queue the message, then wake the
/// foreground so it pumps.
#[derive(Clone)]
pub(crate) struct Outbox {
    tx: mpsc::Sender<BackgroundMessage>,
    waker: Arc<dyn ForegroundWaker>,
}

impl Outbox {
    pub(crate) fn new(tx: mpsc::Sender<BackgroundMessage>, waker: Arc<dyn ForegroundWaker>) -> Self {
        Self { tx, waker }
    }

    /// Returns `false` once the foreground side is gone.
    pub(crate) fn send(&self, message: BackgroundMessage) -> bool {
        if self.tx.send(message).is_err() {
            return false;
        }
        self.waker.wake();
        true
    }
}

/// Renders `tree` until cancelled, sending one patch per changed render.
///
/// The tree stays entered for the whole loop and is exited on every path out,
/// cancellation included. Dispatch failures reported on `faults` end the loop
/// like render failures do.
pub(crate) async fn render_loop(
    tree: Arc<dyn ComponentTree>,
    outbox: Outbox,
    mut faults: async_mpsc::UnboundedReceiver<BridgeError>,
    mut cancel: CancelSignal,
) -> Result<(), BridgeError> {
    let _scope = TreeScope::enter(Arc::clone(&tree))?;
    // Render-side copy used only for diffing; the foreground owns the
    // authoritative snapshot.
    let mut rendered = Snapshot::new();

    loop {
        let output = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("render loop cancelled");
                return Ok(());
            }
            Some(fault) = faults.recv() => return Err(fault),
            output = tree.render() => output?,
        };

        let patch = Patch::create_from(&rendered, &output)?;
        rendered = patch.apply_to(&rendered)?;

        if patch.is_empty() {
            tracing::trace!(path = %output.path, "render produced no changes");
            continue;
        }

        tracing::trace!(path = %patch.path, changes = patch.changes.len(), "render patch ready");
        if !outbox.send(BackgroundMessage::Patch(patch)) {
            tracing::debug!("foreground dropped its inbox; stopping render loop");
            return Ok(());
        }
    }
}

/// Runs [`render_loop`] and turns a failure into a fault for the foreground.
/// A panic in the tree is caught here and reported the same way.
pub(crate) async fn run_render_loop(
    tree: Arc<dyn ComponentTree>,
    outbox: Outbox,
    faults: async_mpsc::UnboundedReceiver<BridgeError>,
    cancel: CancelSignal,
) {
    let result = AssertUnwindSafe(render_loop(tree, outbox.clone(), faults, cancel))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panic_error(payload)));

    if let Err(err) = result {
        tracing::error!(error = %err, "render loop terminated");
        outbox.send(BackgroundMessage::Fault(err));
    }
}

pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> BridgeError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    BridgeError::TaskPanicked { message }
}
