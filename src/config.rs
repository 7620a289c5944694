//! Configuration module for chatrelay.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::chat::{ChannelRegistry, ChannelScope};
use crate::{RelayError, Result};

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file. Empty means console only.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/chatrelay.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Relay-wide settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Channel used when a participant has not selected one.
    #[serde(default = "default_channel_id")]
    pub default_channel: String,
    /// Permission that masks the sender identity on delivery.
    #[serde(default = "default_hide_identity_permission")]
    pub hide_identity_permission: String,
    /// Permission that lets a sender whisper participants they cannot see.
    #[serde(default = "default_whisper_vanished_permission")]
    pub whisper_vanished_permission: String,
}

fn default_channel_id() -> String {
    "global".to_string()
}

fn default_hide_identity_permission() -> String {
    "relay.hideidentity".to_string()
}

fn default_whisper_vanished_permission() -> String {
    "relay.whisper.vanished".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_channel: default_channel_id(),
            hide_identity_permission: default_hide_identity_permission(),
            whisper_vanished_permission: default_whisper_vanished_permission(),
        }
    }
}

/// A single channel definition.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Channel id.
    pub id: String,
    /// Leading text that routes one message to this channel.
    #[serde(default)]
    pub quick_prefix: Option<String>,
    /// Permission required to speak.
    #[serde(default)]
    pub speech_permission: Option<String>,
    /// Permission required to be in the audience.
    #[serde(default)]
    pub receive_permission: Option<String>,
    /// Audience scope.
    #[serde(default)]
    pub scope: ChannelScope,
    /// Chat line format.
    #[serde(default = "default_channel_format")]
    pub format: String,
}

fn default_channel_format() -> String {
    "<{{sender}}> {{message}}".to_string()
}

impl ChannelConfig {
    /// Create a global channel definition with default format.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            quick_prefix: None,
            speech_permission: None,
            receive_permission: None,
            scope: ChannelScope::Global,
            format: default_channel_format(),
        }
    }
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![ChannelConfig::new(default_channel_id())]
}

/// User-facing notice templates.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    /// Sent to a muted sender.
    #[serde(default = "default_muted")]
    pub muted: String,
    /// Reason shown when a channel refuses speech.
    #[serde(default = "default_speech_denied")]
    pub speech_denied: String,
    /// Sent when a participant whispers themselves.
    #[serde(default = "default_whisper_self")]
    pub whisper_self: String,
    /// Sent when a whisper target is offline, hidden or unknown.
    #[serde(default = "default_whisper_not_found")]
    pub whisper_not_found: String,
    /// Sent when the sender is ignoring the target.
    #[serde(default = "default_whisper_ignoring_target")]
    pub whisper_ignoring_target: String,
    /// Sent when the target is ignoring the sender.
    #[serde(default = "default_whisper_target_ignoring")]
    pub whisper_target_ignoring: String,
    /// Sent on reply with no one to reply to.
    #[serde(default = "default_reply_target_not_set")]
    pub reply_target_not_set: String,
    /// Sender's copy of a whisper.
    #[serde(default = "default_whisper_sender")]
    pub whisper_sender: String,
    /// Recipient's copy of a whisper.
    #[serde(default = "default_whisper_recipient")]
    pub whisper_recipient: String,
    /// Copy shown to spying participants.
    #[serde(default = "default_whisper_spy")]
    pub whisper_spy: String,
}

fn default_muted() -> String {
    "You are muted and cannot speak.".to_string()
}

fn default_speech_denied() -> String {
    "You do not have permission to speak in {{channel}}.".to_string()
}

fn default_whisper_self() -> String {
    "You cannot whisper yourself.".to_string()
}

fn default_whisper_not_found() -> String {
    "No participant found for input '{{target}}'.".to_string()
}

fn default_whisper_ignoring_target() -> String {
    "You are ignoring {{target}}.".to_string()
}

fn default_whisper_target_ignoring() -> String {
    "{{target}} is ignoring you.".to_string()
}

fn default_reply_target_not_set() -> String {
    "You have nobody to reply to.".to_string()
}

fn default_whisper_sender() -> String {
    "[You -> {{recipient}}] {{message}}".to_string()
}

fn default_whisper_recipient() -> String {
    "[{{sender}} -> You] {{message}}".to_string()
}

fn default_whisper_spy() -> String {
    "[Spy] {{sender}} -> {{recipient}}: {{message}}".to_string()
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            muted: default_muted(),
            speech_denied: default_speech_denied(),
            whisper_self: default_whisper_self(),
            whisper_not_found: default_whisper_not_found(),
            whisper_ignoring_target: default_whisper_ignoring_target(),
            whisper_target_ignoring: default_whisper_target_ignoring(),
            reply_target_not_set: default_reply_target_not_set(),
            whisper_sender: default_whisper_sender(),
            whisper_recipient: default_whisper_recipient(),
            whisper_spy: default_whisper_spy(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Relay settings.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Channels in priority order.
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
    /// Custom placeholders expanded in channel formats.
    #[serde(default)]
    pub placeholders: HashMap<String, String>,
    /// Notice templates.
    #[serde(default)]
    pub messages: MessagesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            relay: RelayConfig::default(),
            channels: default_channels(),
            placeholders: HashMap::new(),
            messages: MessagesConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(RelayError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| RelayError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `CHATRELAY_LOG_LEVEL`: Override the log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("CHATRELAY_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Runs the same checks the channel registry applies at start-up:
    /// unique channel ids, unique quick prefixes and a registered default.
    pub fn validate(&self) -> Result<()> {
        ChannelRegistry::from_config(self).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/chatrelay.log");

        assert_eq!(config.relay.default_channel, "global");
        assert_eq!(config.relay.hide_identity_permission, "relay.hideidentity");
        assert_eq!(
            config.relay.whisper_vanished_permission,
            "relay.whisper.vanished"
        );

        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.channels[0].id, "global");
        assert_eq!(config.channels[0].scope, ChannelScope::Global);
        assert!(config.channels[0].quick_prefix.is_none());
        assert_eq!(config.channels[0].format, "<{{sender}}> {{message}}");

        assert!(config.placeholders.is_empty());
        assert_eq!(config.messages.whisper_self, "You cannot whisper yourself.");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r##"
[logging]
level = "debug"
file = ""

[relay]
default_channel = "local"
hide_identity_permission = "mod.hide"
whisper_vanished_permission = "mod.see"

[[channels]]
id = "staff"
quick_prefix = "#"
speech_permission = "chat.staff"
receive_permission = "chat.staff"
format = "[Staff] {{sender}}: {{message}}"

[[channels]]
id = "local"
scope = "server"

[placeholders]
server_name = "Survival"

[messages]
muted = "Shh."
"##;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.file.is_empty());

        assert_eq!(config.relay.default_channel, "local");
        assert_eq!(config.relay.hide_identity_permission, "mod.hide");
        assert_eq!(config.relay.whisper_vanished_permission, "mod.see");

        assert_eq!(config.channels.len(), 2);
        let staff = &config.channels[0];
        assert_eq!(staff.id, "staff");
        assert_eq!(staff.quick_prefix.as_deref(), Some("#"));
        assert_eq!(staff.speech_permission.as_deref(), Some("chat.staff"));
        assert_eq!(staff.receive_permission.as_deref(), Some("chat.staff"));
        assert_eq!(staff.scope, ChannelScope::Global);
        assert_eq!(staff.format, "[Staff] {{sender}}: {{message}}");

        let local = &config.channels[1];
        assert_eq!(local.scope, ChannelScope::Server);
        assert_eq!(local.format, "<{{sender}}> {{message}}");

        assert_eq!(
            config.placeholders.get("server_name").map(String::as_str),
            Some("Survival")
        );
        assert_eq!(config.messages.muted, "Shh.");
        // Untouched templates keep their defaults
        assert_eq!(config.messages.reply_target_not_set, "You have nobody to reply to.");

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.relay.default_channel, "global");
        assert_eq!(config.channels.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("this is not valid toml [[[");

        assert!(result.is_err());
        if let Err(RelayError::Config(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_parse_unknown_scope() {
        let toml = r#"
[[channels]]
id = "global"
scope = "galaxy"
"#;
        assert!(matches!(Config::parse(toml), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");

        assert!(result.is_err());
        assert!(matches!(result, Err(RelayError::Io(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[logging]\nlevel = \"warn\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_apply_env_overrides_log_level() {
        let original = std::env::var("CHATRELAY_LOG_LEVEL").ok();

        std::env::set_var("CHATRELAY_LOG_LEVEL", "trace");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.logging.level, "trace");

        std::env::set_var("CHATRELAY_LOG_LEVEL", "");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.logging.level, "info");

        if let Some(val) = original {
            std::env::set_var("CHATRELAY_LOG_LEVEL", val);
        } else {
            std::env::remove_var("CHATRELAY_LOG_LEVEL");
        }
    }

    #[test]
    fn test_validate_missing_default() {
        let mut config = Config::default();
        config.relay.default_channel = "nowhere".to_string();

        assert!(matches!(
            config.validate(),
            Err(RelayError::MissingDefaultChannel(id)) if id == "nowhere"
        ));
    }

    #[test]
    fn test_validate_duplicate_prefix() {
        let mut config = Config::default();
        let mut a = ChannelConfig::new("a");
        a.quick_prefix = Some("!".to_string());
        let mut b = ChannelConfig::new("b");
        b.quick_prefix = Some("!".to_string());
        config.channels.push(a);
        config.channels.push(b);

        assert!(matches!(
            config.validate(),
            Err(RelayError::DuplicateQuickPrefix { .. })
        ));
    }

    #[test]
    fn test_validate_duplicate_channel() {
        let mut config = Config::default();
        config.channels.push(ChannelConfig::new("global"));

        assert!(matches!(
            config.validate(),
            Err(RelayError::DuplicateChannel(id)) if id == "global"
        ));
    }
}
