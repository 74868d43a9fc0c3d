use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("component tree failed to mount: {0}")]
    Mount(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("dispatch to '{target}' failed: {reason}")]
    Dispatch { target: String, reason: String },

    #[error("no handler registered for event target '{0}'")]
    UnknownTarget(String),
}

/// One render of the tree: the full subtree found at `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOutput {
    pub path: String,
    pub model: Value,
}

impl RenderOutput {
    pub fn new(path: impl Into<String>, model: Value) -> Self {
        Self {
            path: path.into(),
            model,
        }
    }
}

/// A user event routed back into the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutEvent {
    pub target: String,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// The reactive render target mounted by the bridge.
///
/// `render` is awaited repeatedly by the render loop and should resolve once
/// the tree has a new state to show. `dispatch` runs concurrently with a
/// pending `render` on the same background scheduler, hence `&self`.
#[async_trait]
pub trait ComponentTree: Send + Sync + 'static {
    /// Acquires the tree's resources before the first render.
    fn enter(&self) -> Result<(), TreeError> {
        Ok(())
    }

    /// Releases what `enter` acquired. Called exactly once per successful
    /// `enter`, including when the render loop is cancelled.
    fn exit(&self) {}

    async fn render(&self) -> Result<RenderOutput, TreeError>;

    async fn dispatch(&self, event: LayoutEvent) -> Result<(), TreeError>;
}

/// What a pane renders: either one tree reused across mounts, or a
/// component factory producing a fresh tree for every mount.
pub enum TreeSource {
    Prebuilt(Arc<dyn ComponentTree>),
    Component(Box<dyn Fn() -> Arc<dyn ComponentTree>>),
}

impl TreeSource {
    pub fn component<F, T>(factory: F) -> Self
    where
        F: Fn() -> T + 'static,
        T: ComponentTree,
    {
        TreeSource::Component(Box::new(move || Arc::new(factory()) as Arc<dyn ComponentTree>))
    }

    pub(crate) fn build(&self) -> Arc<dyn ComponentTree> {
        match self {
            TreeSource::Prebuilt(tree) => Arc::clone(tree),
            TreeSource::Component(factory) => factory(),
        }
    }
}

impl std::fmt::Debug for TreeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeSource::Prebuilt(_) => f.write_str("TreeSource::Prebuilt"),
            TreeSource::Component(_) => f.write_str("TreeSource::Component"),
        }
    }
}

/// Keeps a tree entered for as long as the scope lives.
pub(crate) struct TreeScope {
    tree: Arc<dyn ComponentTree>,
}

impl TreeScope {
    pub(crate) fn enter(tree: Arc<dyn ComponentTree>) -> Result<Self, TreeError> {
        tree.enter()?;
        Ok(Self { tree })
    }
}

impl Drop for TreeScope {
    fn drop(&mut self) {
        self.tree.exit();
    }
}
