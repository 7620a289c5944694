//! Per-recipient message rendering.
//!
//! Every recipient gets its own pass through the event's renderer chain,
//! so two recipients may see different text for the same message. A
//! renderer that fails is skipped and the chain continues from the last
//! good value.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use super::channel::Channel;
use super::event::{panic_message, RoutingEvent};
use crate::participant::{Participant, ParticipantId};

/// Replace `{{name}}` placeholders in `template`.
///
/// The template is scanned once. Substituted values are copied verbatim and
/// never rescanned, so a value containing `{{...}}` stays literal. Unknown
/// placeholders are left in place. If a name is given twice the first wins.
pub fn fill_template(template: &str, params: &[(&str, &str)]) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let value = after.find("}}").and_then(|end| {
            let name = &after[..end];
            params
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| (*v, end))
        });
        match value {
            Some((value, end)) => {
                result.push_str(value);
                rest = &after[end + 2..];
            }
            None => {
                result.push_str("{{");
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}

/// Kind of a rendered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Chat from a participant.
    Chat,
    /// Notice from the relay itself.
    System,
}

impl MessageKind {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Chat => "chat",
            MessageKind::System => "system",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rendered content for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub content: String,
    pub kind: MessageKind,
}

impl RenderedMessage {
    pub fn new(content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            content: content.into(),
            kind,
        }
    }

    pub fn chat(content: impl Into<String>) -> Self {
        Self::new(content, MessageKind::Chat)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(content, MessageKind::System)
    }
}

/// Identity attached to a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Identity {
    /// No identity, used for masked senders and relay notices.
    Nil,
    /// A participant's real identity.
    Participant(ParticipantId),
}

impl Identity {
    /// The identity recipients see for `sender`.
    ///
    /// Holders of `hide_permission` are delivered as [`Identity::Nil`].
    pub fn of(sender: &Participant, hide_permission: &str) -> Self {
        if sender.has_permission(hide_permission) {
            Identity::Nil
        } else {
            Identity::Participant(sender.id())
        }
    }
}

/// A renderer failed for one recipient.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RendererFault {
    /// The renderer returned an error.
    #[error("renderer failed: {0}")]
    Failed(String),

    /// The renderer panicked.
    #[error("renderer panicked: {0}")]
    Panicked(String),
}

impl RendererFault {
    pub fn failed(message: impl Into<String>) -> Self {
        RendererFault::Failed(message.into())
    }
}

/// Produces a recipient-specific view of a message.
pub trait Renderer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Render `current` for `recipient`. `original` is the message text
    /// before any rendering.
    fn render(
        &self,
        sender: &Participant,
        recipient: &Participant,
        current: &RenderedMessage,
        original: &str,
    ) -> Result<RenderedMessage, RendererFault>;
}

/// Adapter turning a closure into a [`Renderer`].
pub struct FnRenderer<F> {
    name: String,
    f: F,
}

impl<F> FnRenderer<F>
where
    F: Fn(&Participant, &Participant, &RenderedMessage, &str) -> Result<RenderedMessage, RendererFault>
        + Send
        + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Renderer for FnRenderer<F>
where
    F: Fn(&Participant, &Participant, &RenderedMessage, &str) -> Result<RenderedMessage, RendererFault>
        + Send
        + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn render(
        &self,
        sender: &Participant,
        recipient: &Participant,
        current: &RenderedMessage,
        original: &str,
    ) -> Result<RenderedMessage, RendererFault> {
        (self.f)(sender, recipient, current, original)
    }
}

/// Applies a channel's chat line format. Seeded first in every event.
///
/// The format may use `{{sender}}`, `{{channel}}`, `{{viewer}}` (the
/// recipient's display name), `{{message}}` and any custom placeholder.
/// Placeholders are expanded in the format only, never in message text or
/// display names.
pub struct ChannelRenderer {
    name: String,
    channel: Arc<Channel>,
    placeholders: Arc<HashMap<String, String>>,
}

impl ChannelRenderer {
    pub fn new(channel: Arc<Channel>) -> Self {
        Self::with_placeholders(channel, Arc::new(HashMap::new()))
    }

    /// Renderer that also expands the given custom placeholders.
    pub fn with_placeholders(
        channel: Arc<Channel>,
        placeholders: Arc<HashMap<String, String>>,
    ) -> Self {
        Self {
            name: format!("channel:{}", channel.id()),
            channel,
            placeholders,
        }
    }
}

impl Renderer for ChannelRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(
        &self,
        sender: &Participant,
        recipient: &Participant,
        current: &RenderedMessage,
        _original: &str,
    ) -> Result<RenderedMessage, RendererFault> {
        let sender_name = sender.display_name();
        let viewer = recipient.display_name();

        // Built-in names come first and cannot be shadowed.
        let mut params: Vec<(&str, &str)> = vec![
            ("sender", sender_name.as_str()),
            ("channel", self.channel.id()),
            ("viewer", viewer.as_str()),
            ("message", current.content.as_str()),
        ];
        params.extend(
            self.placeholders
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );

        Ok(RenderedMessage::new(
            fill_template(self.channel.format(), &params),
            current.kind,
        ))
    }
}

/// Holds the process-wide renderers and runs renderer chains.
#[derive(Default)]
pub struct RenderPipeline {
    renderers: Vec<Arc<dyn Renderer>>,
    placeholders: Arc<HashMap<String, String>>,
}

impl RenderPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a renderer that runs after the channel renderer of every event.
    pub fn register_renderer(&mut self, renderer: Arc<dyn Renderer>) {
        self.renderers.push(renderer);
    }

    /// Custom placeholders expanded in every channel format.
    pub fn set_placeholders(&mut self, placeholders: HashMap<String, String>) {
        self.placeholders = Arc::new(placeholders);
    }

    /// Register a closure as a renderer.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Participant, &Participant, &RenderedMessage, &str) -> Result<RenderedMessage, RendererFault>
            + Send
            + Sync
            + 'static,
    {
        self.register_renderer(Arc::new(FnRenderer::new(name, f)));
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }

    /// Initial renderer chain for an event in `channel`.
    pub fn renderers_for(&self, channel: &Arc<Channel>) -> Vec<Arc<dyn Renderer>> {
        let mut chain: Vec<Arc<dyn Renderer>> =
            Vec::with_capacity(self.renderers.len() + 1);
        chain.push(Arc::new(ChannelRenderer::with_placeholders(
            Arc::clone(channel),
            Arc::clone(&self.placeholders),
        )));
        chain.extend(self.renderers.iter().cloned());
        chain
    }

    /// Render the event's current message for one recipient.
    ///
    /// Always produces a message: a faulting renderer is logged and the
    /// chain continues with the value it was given.
    pub fn render(&self, sender: &Participant, recipient: &Participant, event: &RoutingEvent) -> RenderedMessage {
        let original = event.original_message();
        event
            .renderers()
            .iter()
            .fold(RenderedMessage::chat(event.message()), |current, renderer| {
                match apply(renderer.as_ref(), sender, recipient, &current, original) {
                    Ok(next) => next,
                    Err(fault) => {
                        warn!(
                            renderer = renderer.name(),
                            sender = %sender.id(),
                            recipient = %recipient.id(),
                            error = %fault,
                            "renderer faulted, keeping previous output"
                        );
                        current
                    }
                }
            })
    }
}

fn apply(
    renderer: &dyn Renderer,
    sender: &Participant,
    recipient: &Participant,
    current: &RenderedMessage,
    original: &str,
) -> Result<RenderedMessage, RendererFault> {
    catch_unwind(AssertUnwindSafe(|| {
        renderer.render(sender, recipient, current, original)
    }))
    .unwrap_or_else(|payload| Err(RendererFault::Panicked(panic_message(payload))))
}
