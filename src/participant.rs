//! Chat participants for chatrelay.
//!
//! A [`Participant`] is shared between concurrent dispatches and command
//! handlers, so every field is synchronized on its own. No operation needs
//! a lock on two fields at once.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique participant identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// A poisoned lock only means another thread panicked mid-write of a plain
// value; the value itself is still usable.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// An addressable chat actor, typically a connected player.
#[derive(Debug)]
pub struct Participant {
    id: ParticipantId,
    username: String,
    display_name: RwLock<Option<String>>,
    server: RwLock<String>,
    online: AtomicBool,
    muted: AtomicBool,
    deafened: AtomicBool,
    spying: AtomicBool,
    vanished: AtomicBool,
    permissions: RwLock<HashSet<String>>,
    ignoring: RwLock<HashSet<ParticipantId>>,
    selected_channel: RwLock<Option<String>>,
    reply_target: RwLock<Option<ParticipantId>>,
    last_whisper_target: RwLock<Option<ParticipantId>>,
    joined_at: DateTime<Utc>,
}

impl Participant {
    /// Create an online participant with a fresh id.
    pub fn new(username: impl Into<String>) -> Self {
        Self::with_id(ParticipantId::new(), username)
    }

    /// Create an online participant with a known id.
    pub fn with_id(id: ParticipantId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            display_name: RwLock::new(None),
            server: RwLock::new(String::new()),
            online: AtomicBool::new(true),
            muted: AtomicBool::new(false),
            deafened: AtomicBool::new(false),
            spying: AtomicBool::new(false),
            vanished: AtomicBool::new(false),
            permissions: RwLock::new(HashSet::new()),
            ignoring: RwLock::new(HashSet::new()),
            selected_channel: RwLock::new(None),
            reply_target: RwLock::new(None),
            last_whisper_target: RwLock::new(None),
            joined_at: Utc::now(),
        }
    }

    /// Builder-style server assignment.
    pub fn on_server(self, server: impl Into<String>) -> Self {
        self.set_server(server);
        self
    }

    /// Builder-style permission grant.
    pub fn with_permission(self, permission: impl Into<String>) -> Self {
        self.grant(permission);
        self
    }

    /// Stable identity.
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Login name, fixed for the participant's lifetime.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// When this participant object was created.
    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    /// Name shown to others: the display-name override, or the username.
    pub fn display_name(&self) -> String {
        read(&self.display_name)
            .clone()
            .unwrap_or_else(|| self.username.clone())
    }

    /// Whether a display-name override is set.
    pub fn has_custom_display_name(&self) -> bool {
        read(&self.display_name).is_some()
    }

    /// Set or clear the display-name override.
    pub fn set_display_name(&self, name: Option<String>) {
        *write(&self.display_name) = name;
    }

    /// Backend server this participant is connected to.
    pub fn server(&self) -> String {
        read(&self.server).clone()
    }

    /// Move this participant to another backend server.
    pub fn set_server(&self, server: impl Into<String>) {
        *write(&self.server) = server.into();
    }

    /// Whether the participant is connected.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Mark the participant connected or disconnected.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// A muted participant cannot speak or whisper.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Mute or unmute.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    /// A deafened participant receives no channel chat.
    pub fn is_deafened(&self) -> bool {
        self.deafened.load(Ordering::Acquire)
    }

    /// Deafen or undeafen.
    pub fn set_deafened(&self, deafened: bool) {
        self.deafened.store(deafened, Ordering::Release);
    }

    /// A spying participant receives copies of other participants' whispers.
    pub fn is_spying(&self) -> bool {
        self.spying.load(Ordering::Acquire)
    }

    /// Start or stop spying on whispers.
    pub fn set_spying(&self, spying: bool) {
        self.spying.store(spying, Ordering::Release);
    }

    /// Vanish state is owned by the host platform; the relay only reads it.
    pub fn is_vanished(&self) -> bool {
        self.vanished.load(Ordering::Acquire)
    }

    /// Hide from or reveal to other participants.
    pub fn set_vanished(&self, vanished: bool) {
        self.vanished.store(vanished, Ordering::Release);
    }

    /// Whether this participant can see `other`.
    pub fn aware_of(&self, other: &Participant) -> bool {
        self.id == other.id || !other.is_vanished()
    }

    /// Whether `permission` has been granted.
    pub fn has_permission(&self, permission: &str) -> bool {
        read(&self.permissions).contains(permission)
    }

    /// Grant `permission`.
    pub fn grant(&self, permission: impl Into<String>) {
        write(&self.permissions).insert(permission.into());
    }

    /// Revoke `permission`. No-op if it was not granted.
    pub fn revoke(&self, permission: &str) {
        write(&self.permissions).remove(permission);
    }

    /// Whether this participant is ignoring `other`.
    pub fn is_ignoring(&self, other: ParticipantId) -> bool {
        read(&self.ignoring).contains(&other)
    }

    /// Start or stop ignoring `other`.
    pub fn set_ignoring(&self, other: ParticipantId, ignoring: bool) {
        let mut set = write(&self.ignoring);
        if ignoring {
            set.insert(other);
        } else {
            set.remove(&other);
        }
    }

    /// Id of the channel this participant has selected, if any.
    pub fn selected_channel(&self) -> Option<String> {
        read(&self.selected_channel).clone()
    }

    /// Select a channel by id, or `None` for the default.
    pub fn select_channel(&self, channel: Option<String>) {
        *write(&self.selected_channel) = channel;
    }

    /// Who `/reply` goes to.
    pub fn reply_target(&self) -> Option<ParticipantId> {
        *read(&self.reply_target)
    }

    /// Set who `/reply` goes to.
    pub fn set_reply_target(&self, target: Option<ParticipantId>) {
        *write(&self.reply_target) = target;
    }

    /// Who this participant last whispered.
    pub fn last_whisper_target(&self) -> Option<ParticipantId> {
        *read(&self.last_whisper_target)
    }

    /// Record who this participant last whispered.
    pub fn set_last_whisper_target(&self, target: Option<ParticipantId>) {
        *write(&self.last_whisper_target) = target;
    }
}

impl PartialEq for Participant {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Participant {}

/// Thread-safe lookup of every known participant.
///
/// Remembers the usernames of removed participants so notices about them
/// can still name them.
#[derive(Debug, Default)]
pub struct ParticipantDirectory {
    participants: RwLock<HashMap<ParticipantId, Arc<Participant>>>,
    departed: RwLock<HashMap<ParticipantId, String>>,
}

impl ParticipantDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant, returning the shared handle.
    ///
    /// An existing entry with the same id is replaced.
    pub fn insert(&self, participant: Participant) -> Arc<Participant> {
        let participant = Arc::new(participant);
        write(&self.departed).remove(&participant.id());
        write(&self.participants).insert(participant.id(), Arc::clone(&participant));
        participant
    }

    /// Remove a participant, remembering their username.
    pub fn remove(&self, id: ParticipantId) -> Option<Arc<Participant>> {
        let removed = write(&self.participants).remove(&id)?;
        write(&self.departed).insert(id, removed.username().to_string());
        Some(removed)
    }

    /// Username of a current or removed participant.
    pub fn last_known_name(&self, id: ParticipantId) -> Option<String> {
        if let Some(participant) = self.get(id) {
            return Some(participant.username().to_string());
        }
        read(&self.departed).get(&id).cloned()
    }

    /// Look up a participant by id.
    pub fn get(&self, id: ParticipantId) -> Option<Arc<Participant>> {
        read(&self.participants).get(&id).cloned()
    }

    /// Case-insensitive username lookup.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Participant>> {
        read(&self.participants)
            .values()
            .find(|p| p.username().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// All online participants, sorted by username.
    pub fn online(&self) -> Vec<Arc<Participant>> {
        let mut online: Vec<_> = read(&self.participants)
            .values()
            .filter(|p| p.is_online())
            .cloned()
            .collect();
        online.sort_by(|a, b| a.username().cmp(b.username()));
        online
    }

    /// Number of participants in the directory.
    pub fn len(&self) -> usize {
        read(&self.participants).len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_defaults() {
        let p = Participant::new("Alice");
        assert_eq!(p.username(), "Alice");
        assert_eq!(p.display_name(), "Alice");
        assert!(!p.has_custom_display_name());
        assert!(p.is_online());
        assert!(!p.is_muted());
        assert!(!p.is_deafened());
        assert!(!p.is_spying());
        assert!(!p.is_vanished());
        assert!(p.selected_channel().is_none());
        assert!(p.reply_target().is_none());
        assert!(p.last_whisper_target().is_none());
    }

    #[test]
    fn test_display_name_override() {
        let p = Participant::new("alice");
        p.set_display_name(Some("Queen Alice".to_string()));
        assert!(p.has_custom_display_name());
        assert_eq!(p.display_name(), "Queen Alice");

        p.set_display_name(None);
        assert_eq!(p.display_name(), "alice");
    }

    #[test]
    fn test_permissions() {
        let p = Participant::new("Alice").with_permission("chat.staff");
        assert!(p.has_permission("chat.staff"));
        assert!(!p.has_permission("chat.admin"));

        p.revoke("chat.staff");
        assert!(!p.has_permission("chat.staff"));
    }

    #[test]
    fn test_ignoring() {
        let alice = Participant::new("Alice");
        let bob = Participant::new("Bob");

        alice.set_ignoring(bob.id(), true);
        assert!(alice.is_ignoring(bob.id()));
        assert!(!bob.is_ignoring(alice.id()));

        alice.set_ignoring(bob.id(), false);
        assert!(!alice.is_ignoring(bob.id()));
    }

    #[test]
    fn test_aware_of_vanished() {
        let alice = Participant::new("Alice");
        let bob = Participant::new("Bob");
        assert!(alice.aware_of(&bob));

        bob.set_vanished(true);
        assert!(!alice.aware_of(&bob));
        assert!(bob.aware_of(&bob));
    }

    #[test]
    fn test_directory_lookup() {
        let directory = ParticipantDirectory::new();
        let alice = directory.insert(Participant::new("Alice"));
        directory.insert(Participant::new("Bob"));

        assert_eq!(directory.len(), 2);
        assert_eq!(directory.get(alice.id()).unwrap().username(), "Alice");
        assert_eq!(directory.find_by_name("aLiCe").unwrap().id(), alice.id());
        assert!(directory.find_by_name("Carol").is_none());

        assert!(directory.remove(alice.id()).is_some());
        assert!(directory.get(alice.id()).is_none());
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_directory_remembers_departed_names() {
        let directory = ParticipantDirectory::new();
        let alice = directory.insert(Participant::new("Alice"));
        assert_eq!(directory.last_known_name(alice.id()).as_deref(), Some("Alice"));

        directory.remove(alice.id());
        assert_eq!(directory.last_known_name(alice.id()).as_deref(), Some("Alice"));
        assert!(directory.last_known_name(ParticipantId::new()).is_none());

        // Rejoining under a new name replaces the remembered one
        directory.insert(Participant::with_id(alice.id(), "Alicia"));
        assert_eq!(directory.last_known_name(alice.id()).as_deref(), Some("Alicia"));
    }

    #[test]
    fn test_directory_online_sorted() {
        let directory = ParticipantDirectory::new();
        directory.insert(Participant::new("Carol"));
        directory.insert(Participant::new("Alice"));
        let bob = directory.insert(Participant::new("Bob"));
        bob.set_online(false);

        let names: Vec<_> = directory
            .online()
            .iter()
            .map(|p| p.username().to_string())
            .collect();
        assert_eq!(names, vec!["Alice", "Carol"]);
    }

    #[test]
    fn test_concurrent_field_updates() {
        let p = Arc::new(Participant::new("Alice"));
        let others: Vec<ParticipantId> = (0..8).map(|_| ParticipantId::new()).collect();

        let handles: Vec<_> = others
            .iter()
            .copied()
            .map(|other| {
                let p = Arc::clone(&p);
                std::thread::spawn(move || {
                    p.set_ignoring(other, true);
                    p.set_reply_target(Some(other));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(others.iter().all(|o| p.is_ignoring(*o)));
        assert!(others.contains(&p.reply_target().unwrap()));
    }
}
