use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::patch::PatchError;
use crate::session::ViewId;
use crate::tree::TreeError;

/// Errors surfaced by the foreground bridge and its lifecycle.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("failed to start background runtime: {0}")]
    RuntimeStart(#[source] io::Error),

    #[error("background thread exited before its scheduler was ready")]
    LoopStartAborted,

    #[error("background thread '{thread}' panicked")]
    LoopPanicked { thread: String },

    /// The background thread survived cancellation and forced shutdown.
    #[error("failed to stop background thread '{thread}' after {waited:?}")]
    TeardownStalled { thread: String, waited: Duration },

    #[error("inbound event payload is malformed: {0}")]
    InvalidEvent(#[source] serde_json::Error),

    #[error("view {0} is not registered")]
    UnknownView(ViewId),

    #[error("no component tree is mounted")]
    NotMounted,

    #[error("pane is broken: {reason}")]
    Broken { reason: String },

    #[error("background task panicked: {message}")]
    TaskPanicked { message: String },

    #[error("render loop failed: {reason}")]
    RenderLoopFailed { reason: String },
}
