//! Message dispatcher for chatrelay.
//!
//! Orchestrates one incoming message end to end: channel resolution,
//! recipient resolution, the handler chain, per-recipient rendering and
//! delivery. Also implements point-to-point whispers and replies.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::delivery::DeliverySink;
use super::event::{ChatHandler, EventBus, HandlerFault, RoutingEvent};
use super::registry::ChannelRegistry;
use super::render::{
    fill_template, Identity, RenderPipeline, RenderedMessage, Renderer, RendererFault,
};
use crate::config::{Config, MessagesConfig, RelayConfig};
use crate::participant::{Participant, ParticipantDirectory};
use crate::Result;

/// Terminal state of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The message was handed to the delivery sink.
    Delivered,
    /// The sender is muted.
    RejectedMuted,
    /// A handler cancelled the message.
    RejectedCancelled,
    /// One side of a whisper is ignoring the other.
    RejectedIgnored,
    /// The whisper target is offline, hidden from the sender, or unknown.
    RejectedUnaware,
    /// The sender tried to whisper themselves.
    RejectedSelf,
    /// A reply was sent with no one to reply to.
    RejectedNoReplyTarget,
}

impl DispatchOutcome {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Delivered => "delivered",
            DispatchOutcome::RejectedMuted => "rejected_muted",
            DispatchOutcome::RejectedCancelled => "rejected_cancelled",
            DispatchOutcome::RejectedIgnored => "rejected_ignored",
            DispatchOutcome::RejectedUnaware => "rejected_unaware",
            DispatchOutcome::RejectedSelf => "rejected_self",
            DispatchOutcome::RejectedNoReplyTarget => "rejected_no_reply_target",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered)
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Permissions and notices the dispatcher consults.
#[derive(Debug, Clone, Default)]
pub struct DispatchSettings {
    pub relay: RelayConfig,
    pub messages: MessagesConfig,
}

/// Collects extensions before the dispatcher is built.
///
/// Handlers and renderers are fixed once [`DispatcherBuilder::build`] runs.
pub struct DispatcherBuilder {
    registry: ChannelRegistry,
    directory: Arc<ParticipantDirectory>,
    sink: Arc<dyn DeliverySink>,
    bus: EventBus,
    pipeline: RenderPipeline,
    settings: DispatchSettings,
}

impl DispatcherBuilder {
    pub fn new(
        registry: ChannelRegistry,
        directory: Arc<ParticipantDirectory>,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        Self {
            registry,
            directory,
            sink,
            bus: EventBus::new(),
            pipeline: RenderPipeline::new(),
            settings: DispatchSettings::default(),
        }
    }

    /// Builder wired from configuration: channels, settings and custom
    /// placeholders.
    pub fn from_config(
        config: &Config,
        directory: Arc<ParticipantDirectory>,
        sink: Arc<dyn DeliverySink>,
    ) -> Result<Self> {
        let registry = ChannelRegistry::from_config(config)?;
        Ok(Self::new(registry, directory, sink)
            .settings(DispatchSettings {
                relay: config.relay.clone(),
                messages: config.messages.clone(),
            })
            .placeholders(config.placeholders.clone()))
    }

    pub fn settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Custom placeholders expanded in every channel format.
    pub fn placeholders(mut self, placeholders: HashMap<String, String>) -> Self {
        self.pipeline.set_placeholders(placeholders);
        self
    }

    /// Register an event handler. Lower priorities run first.
    pub fn register_handler(mut self, priority: i32, handler: Arc<dyn ChatHandler>) -> Self {
        self.bus.subscribe(priority, handler);
        self
    }

    /// Register a closure as an event handler.
    pub fn register_handler_fn<F>(mut self, name: impl Into<String>, priority: i32, f: F) -> Self
    where
        F: Fn(&mut RoutingEvent) -> std::result::Result<(), HandlerFault> + Send + Sync + 'static,
    {
        self.bus.subscribe_fn(name, priority, f);
        self
    }

    /// Register a renderer run after the channel renderer.
    pub fn register_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.pipeline.register_renderer(renderer);
        self
    }

    /// Register a closure as a renderer.
    pub fn register_renderer_fn<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(
                &Participant,
                &Participant,
                &RenderedMessage,
                &str,
            ) -> std::result::Result<RenderedMessage, RendererFault>
            + Send
            + Sync
            + 'static,
    {
        self.pipeline.register_fn(name, f);
        self
    }

    pub fn build(self) -> Dispatcher {
        info!(
            channels = self.registry.len(),
            handlers = self.bus.len(),
            renderers = self.pipeline.len(),
            "dispatcher ready"
        );
        Dispatcher {
            registry: self.registry,
            directory: self.directory,
            sink: self.sink,
            bus: self.bus,
            pipeline: self.pipeline,
            settings: self.settings,
        }
    }
}

/// Routes and delivers chat messages.
///
/// Holds no per-message state, so one instance can dispatch from many
/// threads at once.
pub struct Dispatcher {
    registry: ChannelRegistry,
    directory: Arc<ParticipantDirectory>,
    sink: Arc<dyn DeliverySink>,
    bus: EventBus,
    pipeline: RenderPipeline,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn builder(
        registry: ChannelRegistry,
        directory: Arc<ParticipantDirectory>,
        sink: Arc<dyn DeliverySink>,
    ) -> DispatcherBuilder {
        DispatcherBuilder::new(registry, directory, sink)
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<ParticipantDirectory> {
        &self.directory
    }

    /// Route a channel message from `sender`.
    pub fn dispatch(&self, sender: &Arc<Participant>, raw_message: &str) -> DispatchOutcome {
        if sender.is_muted() {
            self.notify(sender, &self.settings.messages.muted);
            debug!(sender = %sender.id(), "message rejected, sender muted");
            return DispatchOutcome::RejectedMuted;
        }

        let resolved = self.registry.resolve_for_message(sender, raw_message);
        let channel = resolved.channel;

        let recipients: Vec<_> = channel
            .recipients(sender, &self.directory)
            .into_iter()
            .filter(|r| self.reachable(sender, r))
            .collect();

        let renderers = self.pipeline.renderers_for(&channel);
        let mut event = RoutingEvent::new(
            Arc::clone(sender),
            Arc::clone(&channel),
            resolved.message,
            recipients,
            renderers,
        );

        let result = self.bus.emit(&mut event);
        if result.is_cancelled() {
            if !result.reason().is_empty() {
                self.notify(sender, result.reason());
            }
            return DispatchOutcome::RejectedCancelled;
        }

        let identity = Identity::of(sender, &self.settings.relay.hide_identity_permission);
        for recipient in event.recipients() {
            let rendered = self.pipeline.render(sender, recipient, &event);
            self.deliver(recipient, identity, &rendered);
        }

        debug!(
            sender = %sender.id(),
            channel = channel.id(),
            recipients = event.recipients().len(),
            "message delivered"
        );
        DispatchOutcome::Delivered
    }

    /// Whisper `recipient` directly.
    pub fn whisper(
        &self,
        sender: &Arc<Participant>,
        recipient: &Arc<Participant>,
        message: &str,
    ) -> DispatchOutcome {
        if sender.is_muted() {
            self.notify(sender, &self.settings.messages.muted);
            return DispatchOutcome::RejectedMuted;
        }
        self.whisper_to(sender, recipient, recipient.username(), message)
    }

    /// Whisper the participant named `name`.
    ///
    /// An unknown name is reported exactly like a hidden or offline target.
    pub fn whisper_by_name(
        &self,
        sender: &Arc<Participant>,
        name: &str,
        message: &str,
    ) -> DispatchOutcome {
        if sender.is_muted() {
            self.notify(sender, &self.settings.messages.muted);
            return DispatchOutcome::RejectedMuted;
        }
        match self.directory.find_by_name(name) {
            Some(recipient) => self.whisper_to(sender, &recipient, name, message),
            None => self.reject_unaware(sender, name),
        }
    }

    /// Whisper whoever `sender` last exchanged whispers with.
    pub fn reply(&self, sender: &Arc<Participant>, message: &str) -> DispatchOutcome {
        if sender.is_muted() {
            self.notify(sender, &self.settings.messages.muted);
            return DispatchOutcome::RejectedMuted;
        }
        let Some(target) = sender.reply_target() else {
            self.notify(sender, &self.settings.messages.reply_target_not_set);
            return DispatchOutcome::RejectedNoReplyTarget;
        };
        match self.directory.get(target) {
            Some(recipient) => {
                let name = recipient.username().to_string();
                self.whisper_to(sender, &recipient, &name, message)
            }
            None => match self.directory.last_known_name(target) {
                Some(name) => self.reject_unaware(sender, &name),
                None => {
                    sender.set_reply_target(None);
                    self.notify(sender, &self.settings.messages.reply_target_not_set);
                    DispatchOutcome::RejectedNoReplyTarget
                }
            },
        }
    }

    fn whisper_to(
        &self,
        sender: &Arc<Participant>,
        recipient: &Arc<Participant>,
        shown_name: &str,
        message: &str,
    ) -> DispatchOutcome {
        let messages = &self.settings.messages;

        if sender.id() == recipient.id() {
            self.notify(sender, &messages.whisper_self);
            return DispatchOutcome::RejectedSelf;
        }

        let can_see = sender.aware_of(recipient)
            || sender.has_permission(&self.settings.relay.whisper_vanished_permission);
        if !recipient.is_online() || !can_see {
            return self.reject_unaware(sender, shown_name);
        }

        let recipient_name = recipient.display_name();
        if sender.is_ignoring(recipient.id()) {
            debug!(sender = %sender.id(), recipient = %recipient.id(), "whisper rejected, sender ignoring target");
            self.notify(
                sender,
                &fill_template(
                    &messages.whisper_ignoring_target,
                    &[("target", recipient_name.as_str())],
                ),
            );
            return DispatchOutcome::RejectedIgnored;
        }
        if recipient.is_ignoring(sender.id()) {
            debug!(sender = %sender.id(), recipient = %recipient.id(), "whisper rejected, target ignoring sender");
            self.notify(
                sender,
                &fill_template(
                    &messages.whisper_target_ignoring,
                    &[("target", recipient_name.as_str())],
                ),
            );
            return DispatchOutcome::RejectedIgnored;
        }

        let sender_name = sender.display_name();
        let params = [
            ("sender", sender_name.as_str()),
            ("recipient", recipient_name.as_str()),
            ("message", message),
        ];
        let identity = Identity::of(sender, &self.settings.relay.hide_identity_permission);

        self.deliver(
            sender,
            identity,
            &RenderedMessage::chat(fill_template(&messages.whisper_sender, &params)),
        );
        self.deliver(
            recipient,
            identity,
            &RenderedMessage::chat(fill_template(&messages.whisper_recipient, &params)),
        );

        let spy_copy = RenderedMessage::system(fill_template(&messages.whisper_spy, &params));
        for spy in self.directory.online() {
            if spy.is_spying() && spy.id() != sender.id() && spy.id() != recipient.id() {
                self.deliver(&spy, Identity::Nil, &spy_copy);
            }
        }

        info!(
            target: "chatrelay::whisper",
            sender = %sender.id(),
            recipient = %recipient.id(),
            "{} -> {}: {}",
            sender_name,
            recipient_name,
            message
        );

        sender.set_last_whisper_target(Some(recipient.id()));
        sender.set_reply_target(Some(recipient.id()));
        recipient.set_reply_target(Some(sender.id()));

        DispatchOutcome::Delivered
    }

    fn reject_unaware(&self, sender: &Participant, shown_name: &str) -> DispatchOutcome {
        debug!(sender = %sender.id(), target = shown_name, "whisper rejected, target not visible");
        self.notify(
            sender,
            &fill_template(&self.settings.messages.whisper_not_found, &[("target", shown_name)]),
        );
        DispatchOutcome::RejectedUnaware
    }

    /// Channel-wide gates applied on top of the channel's own audience.
    fn reachable(&self, sender: &Participant, recipient: &Participant) -> bool {
        if recipient.id() == sender.id() {
            return true;
        }
        !recipient.is_ignoring(sender.id()) && !recipient.is_deafened()
    }

    fn notify(&self, participant: &Participant, text: &str) {
        self.deliver(participant, Identity::Nil, &RenderedMessage::system(text));
    }

    fn deliver(&self, recipient: &Participant, identity: Identity, message: &RenderedMessage) {
        if let Err(e) = self.sink.deliver(recipient, identity, message) {
            warn!(recipient = %recipient.id(), error = %e, "delivery failed");
        }
    }
}
