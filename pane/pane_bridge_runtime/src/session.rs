use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::ReactiveModel;

/// Identifier of a mounted foreground view (the root model reference).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(String);

impl ViewId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// How a view reaches the browser. Picks the import source URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Server,
    Notebook,
}

/// The dashboard session a view belongs to. Foreground-only.
pub trait ViewSession {
    /// Whether an interactive session context (with a tick scheduler) backs
    /// this view. Static renders return `false`.
    fn is_interactive(&self) -> bool;

    fn transport(&self) -> Transport {
        Transport::Server
    }

    /// Asks the session to call `PaneBridge::flush_view` for `view` on its
    /// next tick.
    fn schedule_next_tick(&self, view: &ViewId);

    /// Pushes the model's pending changes to the browser synchronously.
    fn push(&self, view: &ViewId, model: &ReactiveModel);
}

/// Wakes the foreground after the background loop queued work for it.
/// Called from the background thread.
pub trait ForegroundWaker: Send + Sync {
    fn wake(&self);
}

impl<F> ForegroundWaker for F
where
    F: Fn() + Send + Sync,
{
    fn wake(&self) {
        self()
    }
}
