//! Chat routing module for chatrelay.
//!
//! This module provides the message routing and rendering pipeline:
//! - Channels and the channel registry (quick prefixes, default channel)
//! - Routing events and the priority-ordered event bus
//! - Per-recipient render pipeline with fault isolation
//! - Delivery sinks
//! - The dispatcher for channel chat, whispers and replies

mod channel;
mod delivery;
mod dispatcher;
mod event;
mod registry;
mod render;

pub use channel::{Channel, ChannelScope, SpeechPermission};
pub use delivery::{Delivery, DeliveryError, DeliverySink, SessionSink};
pub use dispatcher::{DispatchOutcome, DispatchSettings, Dispatcher, DispatcherBuilder};
pub use event::{ChatHandler, EventBus, EventResult, FnHandler, HandlerFault, RoutingEvent};
pub use registry::{ChannelRegistry, ResolvedMessage};
pub use render::{
    fill_template, ChannelRenderer, FnRenderer, Identity, MessageKind, RenderPipeline,
    RenderedMessage, Renderer, RendererFault,
};
