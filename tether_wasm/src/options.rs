//! Constructor options for the JS facade.

use serde::{Deserialize, Serialize};
use tether_core::SessionConfig;

/// Global holding the structured channel, e.g. a `MessagePort` or `window.parent`.
pub const DEFAULT_CHANNEL: &str = "tetherPort";

/// Global the host sets when it installs a bridge function.
pub const DEFAULT_BRIDGE_MARKER: &str = "__TETHER_HOST__";

/// Global holding the host's bridge function.
pub const DEFAULT_BRIDGE_FUNCTION: &str = "__tetherBridge";

/// Where to find the host, and how to talk to it.
///
/// Read from a plain JS object; every member is optional:
///
/// ```js
/// new Tether({ channel: "hostPort", config: { max_pending: 256 } })
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TetherOptions {
    /// Name of the `globalThis` property holding the `postMessage` target.
    pub channel: String,

    /// Name of the `globalThis` property announcing a bridge.
    pub bridge_marker: String,

    /// Name of the `globalThis` property holding the bridge function.
    pub bridge_function: String,

    /// Session tunables.
    pub config: SessionConfig,
}

impl Default for TetherOptions {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.into(),
            bridge_marker: DEFAULT_BRIDGE_MARKER.into(),
            bridge_function: DEFAULT_BRIDGE_FUNCTION.into(),
            config: SessionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use serde_json::json;

    #[test]
    fn empty_object_uses_defaults() {
        let options: TetherOptions = serde_json::from_value(json!({})).expect("valid");
        assert_eq!(options, TetherOptions::default());
    }

    #[test]
    fn partial_object_overrides_named_members() {
        let options: TetherOptions = serde_json::from_value(json!({
            "channel": "hostPort",
            "config": { "max_pending": 8, "default_deadline": 1500 }
        }))
        .expect("valid");

        assert_eq!(options.channel, "hostPort");
        assert_eq!(options.bridge_marker, DEFAULT_BRIDGE_MARKER);
        assert_eq!(options.config.max_pending, 8);
        assert_eq!(
            options.config.default_deadline,
            Some(Duration::from_millis(1500))
        );
    }
}
