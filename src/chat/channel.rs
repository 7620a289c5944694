//! Chat channel implementation for chatrelay.
//!
//! A channel is an immutable audience-and-permission policy. It decides
//! who may speak in it and who hears it; mute, ignore and deafen gates are
//! applied by the dispatcher for every channel alike.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use super::render::fill_template;
use crate::config::ChannelConfig;
use crate::participant::{Participant, ParticipantDirectory};

/// Audience scope of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelScope {
    /// Every online participant.
    #[default]
    Global,
    /// Online participants on the sender's server.
    Server,
}

impl ChannelScope {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelScope::Global => "global",
            ChannelScope::Server => "server",
        }
    }
}

impl fmt::Display for ChannelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a speech permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechPermission {
    Permitted,
    Denied(String),
}

impl SpeechPermission {
    /// Whether the sender may speak.
    pub fn permitted(&self) -> bool {
        matches!(self, SpeechPermission::Permitted)
    }

    /// Reason shown to the sender, if speech was denied.
    pub fn reason(&self) -> Option<&str> {
        match self {
            SpeechPermission::Permitted => None,
            SpeechPermission::Denied(reason) => Some(reason),
        }
    }
}

/// A chat channel.
#[derive(Debug, Clone)]
pub struct Channel {
    id: String,
    quick_prefix: Option<String>,
    speech_permission: Option<String>,
    receive_permission: Option<String>,
    scope: ChannelScope,
    format: String,
    denied_reason: String,
}

impl Channel {
    /// Create a global channel with the default format and no permissions.
    pub fn new(id: impl Into<String>) -> Self {
        Self::from_config(&ChannelConfig::new(id), "")
    }

    /// Build a channel from its configuration.
    ///
    /// `speech_denied` is the notice template used when speech is refused.
    pub fn from_config(config: &ChannelConfig, speech_denied: &str) -> Self {
        Self {
            id: config.id.clone(),
            quick_prefix: config.quick_prefix.clone().filter(|p| !p.is_empty()),
            speech_permission: config.speech_permission.clone(),
            receive_permission: config.receive_permission.clone(),
            scope: config.scope,
            format: config.format.clone(),
            denied_reason: fill_template(speech_denied, &[("channel", config.id.as_str())]),
        }
    }

    /// Builder-style quick prefix.
    pub fn with_quick_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.quick_prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Builder-style speech permission.
    pub fn with_speech_permission(mut self, permission: impl Into<String>) -> Self {
        self.speech_permission = Some(permission.into());
        self
    }

    /// Builder-style receive permission.
    pub fn with_receive_permission(mut self, permission: impl Into<String>) -> Self {
        self.receive_permission = Some(permission.into());
        self
    }

    /// Builder-style scope.
    pub fn with_scope(mut self, scope: ChannelScope) -> Self {
        self.scope = scope;
        self
    }

    /// Builder-style format.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Unique channel id, as used in configuration and channel selection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Prefix that routes a single message here, if any.
    pub fn quick_prefix(&self) -> Option<&str> {
        self.quick_prefix.as_deref()
    }

    /// Which participants the audience is drawn from.
    pub fn scope(&self) -> ChannelScope {
        self.scope
    }

    /// Chat line format, with `{{sender}}`, `{{channel}}`, `{{viewer}}`,
    /// `{{message}}` and custom placeholders.
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Whether `sender` may speak in this channel. Side-effect free.
    pub fn speech_permitted(&self, sender: &Participant) -> SpeechPermission {
        match &self.speech_permission {
            Some(permission) if !sender.has_permission(permission) => {
                SpeechPermission::Denied(self.denied_reason.clone())
            }
            _ => SpeechPermission::Permitted,
        }
    }

    /// The channel's audience for a message from `sender`.
    ///
    /// Excludes participants the channel cannot reach (offline, on another
    /// server for server scope, missing the receive permission). Does not
    /// apply mute, ignore or vanish gates.
    pub fn recipients(
        &self,
        sender: &Participant,
        directory: &ParticipantDirectory,
    ) -> Vec<Arc<Participant>> {
        let sender_server = match self.scope {
            ChannelScope::Global => None,
            ChannelScope::Server => Some(sender.server()),
        };

        directory
            .online()
            .into_iter()
            .filter(|p| {
                sender_server
                    .as_ref()
                    .map_or(true, |server| p.server() == *server)
            })
            .filter(|p| {
                self.receive_permission
                    .as_ref()
                    .map_or(true, |permission| p.has_permission(permission))
            })
            .collect()
    }
}
