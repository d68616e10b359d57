//! Per-window parameters recorded at open time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use peek_host::{EscapeMode, OpenOptions};
use peek_ipc::Address;

/// Parameters a window was opened with, as the lifecycle controller sees them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowParams {
    /// Address of the content loaded in the window. Children opened by this
    /// window are owned by this address.
    pub address: Address,
    /// Sanitized reuse key.
    pub key: Option<String>,
    pub escape_mode: EscapeMode,
    pub modal: bool,
    pub keep_live: bool,
    /// Opened while no window had focus.
    pub transient: bool,
    pub open_dev_tools: bool,
    /// Unrecognized open options, kept opaque.
    pub extra: Map<String, Value>,
}

impl WindowParams {
    /// Bare parameters for a window at `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            key: None,
            escape_mode: EscapeMode::default(),
            modal: false,
            keep_live: false,
            transient: false,
            open_dev_tools: false,
            extra: Map::new(),
        }
    }

    /// Record the options a window was opened with.
    pub fn from_options(address: Address, options: &OpenOptions, transient: bool) -> Self {
        Self {
            address,
            key: options.key.as_deref().map(sanitize_key),
            escape_mode: options.escape_mode.unwrap_or_default(),
            modal: options.modal,
            keep_live: options.keep_live,
            transient,
            open_dev_tools: options.open_dev_tools,
            extra: options.extra.clone(),
        }
    }

    /// Escape asks the content before dismissing.
    pub fn asks_on_escape(&self) -> bool {
        match self.escape_mode {
            EscapeMode::Close => false,
            EscapeMode::Navigate => true,
            EscapeMode::Auto => !self.transient,
        }
    }
}

/// Map a reuse key onto `[A-Za-z0-9-/:_]`; anything else becomes `_`.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '/' | ':' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("peek://app/settings"), "peek://app/settings");
        assert_eq!(sanitize_key("my key.html?x=1"), "my_key_html_x_1");
        assert_eq!(sanitize_key("größe"), "gr__e");
    }

    #[test]
    fn test_escape_mode_resolution() {
        let mut params = WindowParams::new(Address::resolve("a.html"));
        assert!(!params.asks_on_escape());

        params.escape_mode = EscapeMode::Navigate;
        assert!(params.asks_on_escape());

        params.escape_mode = EscapeMode::Auto;
        params.transient = true;
        assert!(!params.asks_on_escape());
        params.transient = false;
        assert!(params.asks_on_escape());
    }

    #[test]
    fn test_from_options() {
        let options = OpenOptions {
            key: Some("a b".into()),
            modal: true,
            ..OpenOptions::default()
        };
        let params = WindowParams::from_options(Address::resolve("x.html"), &options, true);
        assert_eq!(params.key.as_deref(), Some("a_b"));
        assert!(params.modal);
        assert!(params.transient);
        assert_eq!(params.escape_mode, EscapeMode::Close);
    }
}
