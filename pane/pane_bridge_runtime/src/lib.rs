pub mod bridge;
pub mod config;
pub mod error;
mod lifecycle;
pub mod loop_runner;
pub mod model;
pub mod patch;
mod render_loop;
pub mod session;
pub mod tree;

#[cfg(test)]
mod test_support;

pub use crate::bridge::PaneBridge;
pub use crate::config::BridgeConfig;
pub use crate::error::BridgeError;
pub use crate::lifecycle::LifecycleState;
pub use crate::loop_runner::{BackgroundLoop, CancelSignal, Shutdown, spawn_threaded_event_loop};
pub use crate::model::{InboundMessage, ReactiveModel};
pub use crate::patch::{Change, Patch, PatchError, Snapshot};
pub use crate::session::{ForegroundWaker, Transport, ViewId, ViewSession};
pub use crate::tree::{ComponentTree, LayoutEvent, RenderOutput, TreeError, TreeSource};
pub use serde_json;
