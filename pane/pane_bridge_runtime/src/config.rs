use std::time::Duration;

use crate::session::Transport;

const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_FORCE_JOIN_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_THREAD_NAME: &str = "pane-render-loop";
const DEFAULT_SERVER_IMPORT_SOURCE_URL: &str = "/static/extensions/panel/reactive";
const DEFAULT_NOTEBOOK_IMPORT_SOURCE_URL: &str = "/panel_dist/reactive";

/// Bridge settings. Every field has a default and an environment override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// How long teardown waits for the background thread after cancelling.
    pub join_timeout: Duration,
    /// How long teardown waits again after forcing the scheduler to stop.
    pub force_join_timeout: Duration,
    pub thread_name: String,
    pub server_import_source_url: String,
    pub notebook_import_source_url: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            force_join_timeout: DEFAULT_FORCE_JOIN_TIMEOUT,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            server_import_source_url: DEFAULT_SERVER_IMPORT_SOURCE_URL.to_string(),
            notebook_import_source_url: DEFAULT_NOTEBOOK_IMPORT_SOURCE_URL.to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `PANE_BRIDGE_*` variables; unset or invalid values keep defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(timeout) = parse_millis(lookup("PANE_BRIDGE_JOIN_TIMEOUT_MS")) {
            config.join_timeout = timeout;
        }
        if let Some(timeout) = parse_millis(lookup("PANE_BRIDGE_FORCE_JOIN_TIMEOUT_MS")) {
            config.force_join_timeout = timeout;
        }
        if let Some(name) = non_empty(lookup("PANE_BRIDGE_THREAD_NAME")) {
            config.thread_name = name;
        }
        if let Some(url) = non_empty(lookup("PANE_BRIDGE_IMPORT_SOURCE_URL")) {
            config.server_import_source_url = url;
        }
        if let Some(url) = non_empty(lookup("PANE_BRIDGE_NOTEBOOK_IMPORT_SOURCE_URL")) {
            config.notebook_import_source_url = url;
        }

        config
    }

    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_force_join_timeout(mut self, timeout: Duration) -> Self {
        self.force_join_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    #[must_use]
    pub fn with_import_source_urls(
        mut self,
        server: impl Into<String>,
        notebook: impl Into<String>,
    ) -> Self {
        self.server_import_source_url = server.into();
        self.notebook_import_source_url = notebook.into();
        self
    }

    pub fn import_source_url(&self, transport: Transport) -> &str {
        match transport {
            Transport::Server => &self.server_import_source_url,
            Transport::Notebook => &self.notebook_import_source_url,
        }
    }
}

fn parse_millis(raw: Option<String>) -> Option<Duration> {
    raw.and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_millis)
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}
