//! Routing events and the event bus.
//!
//! A [`RoutingEvent`] is created for each channel message and handed to
//! every subscribed [`ChatHandler`] in ascending priority order. Handlers
//! may change the recipients, the message text and the renderer list, or
//! cancel the message outright.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::channel::Channel;
use super::render::Renderer;
use crate::participant::{Participant, ParticipantId};

/// A handler failed while processing an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerFault {
    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Failed(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerFault {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerFault::Failed(message.into())
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Mutable per-message context shared across handlers.
///
/// Owned by a single dispatch; never shared between messages.
#[derive(Clone)]
pub struct RoutingEvent {
    sender: Arc<Participant>,
    channel: Arc<Channel>,
    original_message: String,
    message: String,
    recipients: Vec<Arc<Participant>>,
    renderers: Vec<Arc<dyn Renderer>>,
    cancelled: bool,
    cancellation_reason: String,
}

impl RoutingEvent {
    /// Create a new, uncancelled event.
    ///
    /// Duplicate recipients are dropped, keeping the first occurrence.
    pub fn new(
        sender: Arc<Participant>,
        channel: Arc<Channel>,
        message: impl Into<String>,
        recipients: Vec<Arc<Participant>>,
        renderers: Vec<Arc<dyn Renderer>>,
    ) -> Self {
        let message = message.into();
        let mut event = Self {
            sender,
            channel,
            original_message: message.clone(),
            message,
            recipients: Vec::with_capacity(recipients.len()),
            renderers,
            cancelled: false,
            cancellation_reason: String::new(),
        };
        for recipient in recipients {
            event.add_recipient(recipient);
        }
        event
    }

    pub fn sender(&self) -> &Arc<Participant> {
        &self.sender
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Message text as it entered the pipeline.
    pub fn original_message(&self) -> &str {
        &self.original_message
    }

    /// Current message text, possibly replaced by a handler.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    pub fn recipients(&self) -> &[Arc<Participant>] {
        &self.recipients
    }

    /// Add a recipient. Returns false if already present.
    pub fn add_recipient(&mut self, recipient: Arc<Participant>) -> bool {
        if self.recipients.iter().any(|r| r.id() == recipient.id()) {
            return false;
        }
        self.recipients.push(recipient);
        true
    }

    /// Remove a recipient. Returns false if not present.
    pub fn remove_recipient(&mut self, id: ParticipantId) -> bool {
        let before = self.recipients.len();
        self.recipients.retain(|r| r.id() != id);
        self.recipients.len() != before
    }

    /// Keep only recipients matching `keep`.
    pub fn retain_recipients<F>(&mut self, keep: F)
    where
        F: FnMut(&Arc<Participant>) -> bool,
    {
        self.recipients.retain(keep);
    }

    pub fn renderers(&self) -> &[Arc<dyn Renderer>] {
        &self.renderers
    }

    /// Append a renderer to the end of the chain.
    pub fn add_renderer(&mut self, renderer: Arc<dyn Renderer>) {
        self.renderers.push(renderer);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn cancellation_reason(&self) -> &str {
        &self.cancellation_reason
    }

    /// Cancel the message.
    ///
    /// The first non-empty reason sticks: a later `cancel` keeps the event
    /// cancelled but does not replace a reason that is already set.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.cancelled = true;
        if self.cancellation_reason.is_empty() {
            self.cancellation_reason = reason.into();
        }
    }

    /// Lift a cancellation, clearing its reason.
    pub fn uncancel(&mut self) {
        self.cancelled = false;
        self.cancellation_reason.clear();
    }

    /// Terminal state of the event as it stands.
    pub fn result(&self) -> EventResult {
        if self.cancelled {
            EventResult::Cancelled(self.cancellation_reason.clone())
        } else {
            EventResult::NotCancelled
        }
    }
}

impl fmt::Debug for RoutingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingEvent")
            .field("sender", &self.sender.id())
            .field("channel", &self.channel.id())
            .field("message", &self.message)
            .field("recipients", &self.recipients.len())
            .field(
                "renderers",
                &self.renderers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("cancelled", &self.cancelled)
            .field("cancellation_reason", &self.cancellation_reason)
            .finish()
    }
}

/// Outcome of emitting an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventResult {
    /// Delivery proceeds.
    NotCancelled,
    /// Delivery aborts. A non-empty reason is shown to the sender.
    Cancelled(String),
}

impl EventResult {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EventResult::Cancelled(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            EventResult::NotCancelled => "",
            EventResult::Cancelled(reason) => reason,
        }
    }
}

/// A subscriber that may inspect and mutate routing events.
pub trait ChatHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handle an event.
    fn handle(&self, event: &mut RoutingEvent) -> Result<(), HandlerFault>;
}

/// Adapter turning a closure into a [`ChatHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&mut RoutingEvent) -> Result<(), HandlerFault> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> ChatHandler for FnHandler<F>
where
    F: Fn(&mut RoutingEvent) -> Result<(), HandlerFault> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &mut RoutingEvent) -> Result<(), HandlerFault> {
        (self.f)(event)
    }
}

struct HandlerEntry {
    priority: i32,
    handler: Arc<dyn ChatHandler>,
}

/// Delivers routing events to handlers in ascending priority order.
///
/// Handlers with equal priority run in registration order. One `emit`
/// runs its handlers strictly one after another; separate events may be
/// emitted from different threads at the same time.
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<HandlerEntry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    pub fn subscribe(&mut self, priority: i32, handler: Arc<dyn ChatHandler>) {
        debug!(handler = handler.name(), priority, "chat handler registered");
        self.handlers.push(HandlerEntry { priority, handler });
        // Stable sort keeps registration order within a priority.
        self.handlers.sort_by_key(|h| h.priority);
    }

    /// Register a closure as a handler.
    pub fn subscribe_fn<F>(&mut self, name: impl Into<String>, priority: i32, f: F)
    where
        F: Fn(&mut RoutingEvent) -> Result<(), HandlerFault> + Send + Sync + 'static,
    {
        self.subscribe(priority, Arc::new(FnHandler::new(name, f)));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handler names in execution order.
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.handler.name()).collect()
    }

    /// Run every handler over `event` and report the final state.
    ///
    /// A handler that fails or panics is logged and its changes to the
    /// event are rolled back; the remaining handlers still run.
    pub fn emit(&self, event: &mut RoutingEvent) -> EventResult {
        for entry in &self.handlers {
            let snapshot = event.clone();
            let outcome = catch_unwind(AssertUnwindSafe(|| entry.handler.handle(event)))
                .unwrap_or_else(|payload| Err(HandlerFault::Panicked(panic_message(payload))));

            if let Err(fault) = outcome {
                warn!(
                    handler = entry.handler.name(),
                    sender = %event.sender().id(),
                    error = %fault,
                    "chat handler faulted, ignoring its changes"
                );
                *event = snapshot;
            }
        }

        let result = event.result();
        if result.is_cancelled() {
            debug!(
                sender = %event.sender().id(),
                channel = event.channel().id(),
                reason = result.reason(),
                "chat event cancelled"
            );
        }
        result
    }
}
