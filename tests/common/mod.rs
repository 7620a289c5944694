//! Test helpers for relay integration tests.
//!
//! Provides a TestRelay that owns a directory and an in-process sink, and
//! an Inbox wrapper around each participant's delivery channel.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use chatrelay::chat::{Delivery, DispatcherBuilder};
use chatrelay::{Channel, ChannelRegistry, ChannelScope, Participant, ParticipantDirectory, SessionSink};

/// Default timeout for waiting on a delivery.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Permission guarding the staff channel in [`TestRelay::registry`].
pub const STAFF_PERMISSION: &str = "chat.staff";

/// Receiving end of one participant's session.
pub struct Inbox {
    rx: UnboundedReceiver<Delivery>,
}

impl Inbox {
    /// Everything delivered so far.
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Ok(d) = self.rx.try_recv() {
            out.push(d);
        }
        out
    }

    /// Content of everything delivered so far.
    pub fn contents(&mut self) -> Vec<String> {
        self.drain().into_iter().map(|d| d.message.content).collect()
    }

    /// Wait for the next delivery.
    pub async fn next(&mut self) -> Option<Delivery> {
        timeout(DEFAULT_TIMEOUT, self.rx.recv()).await.ok().flatten()
    }
}

/// Directory, sink and channel layout shared by the integration tests.
pub struct TestRelay {
    pub directory: Arc<ParticipantDirectory>,
    pub sink: Arc<SessionSink>,
}

impl TestRelay {
    pub fn new() -> Self {
        Self {
            directory: Arc::new(ParticipantDirectory::new()),
            sink: Arc::new(SessionSink::new()),
        }
    }

    /// Add an online participant and open their session.
    pub fn join(&self, name: &str) -> (Arc<Participant>, Inbox) {
        self.join_server(name, "lobby")
    }

    /// Add an online participant on `server` and open their session.
    pub fn join_server(&self, name: &str, server: &str) -> (Arc<Participant>, Inbox) {
        let participant = self
            .directory
            .insert(Participant::new(name).on_server(server));
        let rx = self.sink.connect(participant.id());
        (participant, Inbox { rx })
    }

    /// global (default), local (server scope, `!`), staff (`#`, permissioned).
    pub fn registry() -> ChannelRegistry {
        ChannelRegistry::new(
            vec![
                Channel::new("global"),
                Channel::new("local")
                    .with_quick_prefix("!")
                    .with_scope(ChannelScope::Server)
                    .with_format("(local) <{{sender}}> {{message}}"),
                Channel::new("staff")
                    .with_quick_prefix("#")
                    .with_speech_permission(STAFF_PERMISSION)
                    .with_receive_permission(STAFF_PERMISSION)
                    .with_format("[Staff] {{sender}}: {{message}}"),
            ],
            "global",
        )
        .expect("valid test registry")
    }

    pub fn builder(&self) -> DispatcherBuilder {
        DispatcherBuilder::new(
            Self::registry(),
            Arc::clone(&self.directory),
            self.sink.clone(),
        )
    }
}
