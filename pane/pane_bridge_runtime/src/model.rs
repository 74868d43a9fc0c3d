use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::patch::Patch;

/// Front-end model state synced with the browser.
///
/// `event` is the outbound patch, `msg` the inbound event slot the browser
/// fills and the bridge clears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactiveModel {
    pub import_source_url: String,
    pub event: Patch,
    #[serde(default)]
    pub msg: Option<Value>,
}

impl ReactiveModel {
    pub fn new(import_source_url: impl Into<String>, event: Patch) -> Self {
        Self {
            import_source_url: import_source_url.into(),
            event,
            msg: None,
        }
    }

    pub fn update(&mut self, event: Patch) {
        self.event = event;
    }
}

/// A property change sent by the browser. `msg` is `None` when the browser
/// merely reset the slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub msg: Option<Value>,
}

impl InboundMessage {
    pub fn new(msg: Value) -> Self {
        Self { msg: Some(msg) }
    }
}
