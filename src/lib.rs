//! chatrelay - chat relay for multiplayer game servers
//!
//! Accepts a raw message from a participant, resolves its channel and
//! audience, lets extensions veto or alter it, then renders and delivers a
//! per-recipient view.

pub mod chat;
pub mod config;
pub mod error;
pub mod logging;
pub mod participant;

pub use chat::{
    Channel, ChannelRegistry, ChannelScope, ChatHandler, DeliverySink, DispatchOutcome,
    Dispatcher, DispatcherBuilder, EventBus, EventResult, Identity, MessageKind, RenderPipeline,
    RenderedMessage, Renderer, RoutingEvent, SessionSink,
};
pub use config::Config;
pub use error::{RelayError, Result};
pub use participant::{Participant, ParticipantDirectory, ParticipantId};
