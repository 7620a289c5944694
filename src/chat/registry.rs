//! Channel registry for chatrelay.
//!
//! Holds the ordered set of channels configured at start-up. Order is the
//! priority order for quick-prefix matching.

use std::collections::HashMap;
use std::sync::Arc;

use super::channel::Channel;
use crate::config::Config;
use crate::participant::Participant;
use crate::{RelayError, Result};

/// A message after channel resolution.
#[derive(Debug, Clone)]
pub struct ResolvedMessage {
    /// Channel the message goes to.
    pub channel: Arc<Channel>,
    /// Message text with any quick prefix stripped.
    pub message: String,
}

/// Ordered, immutable collection of channels with a designated default.
#[derive(Debug)]
pub struct ChannelRegistry {
    channels: Vec<Arc<Channel>>,
    by_id: HashMap<String, usize>,
    default_index: usize,
}

impl ChannelRegistry {
    /// Create a registry from channels in priority order.
    ///
    /// Fails if a channel has an empty id or a format without
    /// `{{message}}`, if two channels share an id or a quick prefix, or if
    /// `default_id` is not among them.
    pub fn new(channels: Vec<Channel>, default_id: &str) -> Result<Self> {
        let mut by_id = HashMap::new();
        let mut prefixes: HashMap<String, String> = HashMap::new();

        for (index, channel) in channels.iter().enumerate() {
            if channel.id().trim().is_empty() {
                return Err(RelayError::Validation(
                    "channel id must not be empty".to_string(),
                ));
            }
            if !channel.format().contains("{{message}}") {
                return Err(RelayError::Validation(format!(
                    "format of channel {} has no {{{{message}}}} placeholder",
                    channel.id()
                )));
            }
            if by_id.insert(channel.id().to_string(), index).is_some() {
                return Err(RelayError::DuplicateChannel(channel.id().to_string()));
            }
            if let Some(prefix) = channel.quick_prefix() {
                if let Some(first) = prefixes.get(prefix) {
                    return Err(RelayError::DuplicateQuickPrefix {
                        prefix: prefix.to_string(),
                        first: first.clone(),
                        second: channel.id().to_string(),
                    });
                }
                prefixes.insert(prefix.to_string(), channel.id().to_string());
            }
        }

        let default_index = *by_id
            .get(default_id)
            .ok_or_else(|| RelayError::MissingDefaultChannel(default_id.to_string()))?;

        Ok(Self {
            channels: channels.into_iter().map(Arc::new).collect(),
            by_id,
            default_index,
        })
    }

    /// Build the registry described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let channels = config
            .channels
            .iter()
            .map(|c| Channel::from_config(c, &config.messages.speech_denied))
            .collect();
        Self::new(channels, &config.relay.default_channel)
    }

    /// The configured default channel.
    pub fn default_channel(&self) -> Arc<Channel> {
        Arc::clone(&self.channels[self.default_index])
    }

    /// Look up a channel by id.
    pub fn get(&self, id: &str) -> Option<Arc<Channel>> {
        self.by_id.get(id).map(|&i| Arc::clone(&self.channels[i]))
    }

    /// Channels in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Pick the channel for a message.
    ///
    /// Starts from the sender's selected channel (default if unset or
    /// unknown). The first channel, in priority order, whose quick prefix
    /// starts the message and which permits the sender to speak overrides
    /// that choice, and its prefix is stripped. A sender lacking permission
    /// falls through silently to their normal channel.
    pub fn resolve_for_message(&self, sender: &Participant, raw_message: &str) -> ResolvedMessage {
        let selected = sender
            .selected_channel()
            .and_then(|id| self.get(&id))
            .unwrap_or_else(|| self.default_channel());

        for channel in &self.channels {
            let Some(prefix) = channel.quick_prefix() else {
                continue;
            };
            if let Some(rest) = raw_message.strip_prefix(prefix) {
                if channel.speech_permitted(sender).permitted() {
                    return ResolvedMessage {
                        channel: Arc::clone(channel),
                        message: rest.to_string(),
                    };
                }
            }
        }

        ResolvedMessage {
            channel: selected,
            message: raw_message.to_string(),
        }
    }
}
