//! # Library Repository
//!
//! In-memory player state. Every effective mutation raises a typed
//! [`LibraryEvent`] for local observers and an `ILibraryRepo.Send<X>Change`
//! wire change for the communicator, both before the mutator returns.
//! Setting a field to the value it already has raises nothing.

use std::sync::Arc;
use std::sync::Mutex;

use bytes::Bytes;
use chrono::TimeDelta;
use tokio::sync::mpsc;
use uuid::Uuid;

use ownpack::Pack;
use owntcp::Change;
use owntcp::ChangeSource;
use owntcp::Dispatcher;
use owntcp::Subscribers;
use owntcp::Subscription;
use owntcp::Topic;

use crate::model::LibrarySnapshot;
use crate::model::Song;

pub const INTERFACE: &str = "ILibraryRepo";

pub const SEND_VOLUME_CHANGE: &str = "SendVolumeChange";
pub const SEND_IS_PLAYING_CHANGE: &str = "SendIsPlayingChange";
pub const SEND_POSITION_CHANGE: &str = "SendPositionChange";
pub const SEND_CURRENT_SONG_CHANGE: &str = "SendCurrentSongChange";
pub const SEND_SONGS_CHANGE: &str = "SendSongsChange";

#[derive(Debug, Clone, PartialEq)]
pub enum LibraryEvent {
    OnVolumeChange(f32),
    OnIsPlayingChange(bool),
    OnPositionChange(TimeDelta),
    OnCurrentSongChange(Option<Uuid>),
    OnSongsChange(Vec<Song>),
}

impl LibraryEvent {
    /// The `ILibraryRepo` operation that carries this change.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::OnVolumeChange(_) => SEND_VOLUME_CHANGE,
            Self::OnIsPlayingChange(_) => SEND_IS_PLAYING_CHANGE,
            Self::OnPositionChange(_) => SEND_POSITION_CHANGE,
            Self::OnCurrentSongChange(_) => SEND_CURRENT_SONG_CHANGE,
            Self::OnSongsChange(_) => SEND_SONGS_CHANGE,
        }
    }

    fn to_change(&self) -> owntcp::Result<Change> {
        let payload = match self {
            Self::OnVolumeChange(v) => ownpack::to_bytes(v),
            Self::OnIsPlayingChange(v) => ownpack::to_bytes(v),
            Self::OnPositionChange(v) => ownpack::to_bytes(v),
            Self::OnCurrentSongChange(v) => ownpack::to_bytes(v),
            Self::OnSongsChange(v) => ownpack::to_bytes(v),
        }?;
        let topic = Topic::new(INTERFACE, self.operation()).map_err(owntcp::Error::Rpc)?;
        Ok(Change::new(topic, Some(Bytes::from(payload))))
    }
}

pub struct LibraryRepo {
    state: Mutex<LibrarySnapshot>,
    events: Subscribers<LibraryEvent>,
    changes: Subscribers<Change>,
}

impl Default for LibraryRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryRepo {
    pub fn new() -> Self {
        Self::with_snapshot(LibrarySnapshot::default())
    }

    pub fn with_snapshot(snapshot: LibrarySnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            events: Subscribers::new(),
            changes: Subscribers::new(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LibrarySnapshot> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> LibrarySnapshot {
        self.state().clone()
    }

    pub fn volume(&self) -> f32 {
        self.state().volume
    }

    pub fn is_playing(&self) -> bool {
        self.state().is_playing
    }

    pub fn position(&self) -> TimeDelta {
        self.state().position
    }

    pub fn current_song(&self) -> Option<Uuid> {
        self.state().current_song
    }

    pub fn songs(&self) -> Vec<Song> {
        self.state().songs.clone()
    }

    /// Returns true if the volume changed.
    pub fn set_volume(&self, volume: f32) -> bool {
        self.update(|s| store(&mut s.volume, volume).then_some(LibraryEvent::OnVolumeChange(volume)))
    }

    pub fn set_is_playing(&self, is_playing: bool) -> bool {
        self.update(|s| store(&mut s.is_playing, is_playing).then_some(LibraryEvent::OnIsPlayingChange(is_playing)))
    }

    pub fn set_position(&self, position: TimeDelta) -> bool {
        self.update(|s| store(&mut s.position, position).then_some(LibraryEvent::OnPositionChange(position)))
    }

    pub fn set_current_song(&self, song: Option<Uuid>) -> bool {
        self.update(|s| store(&mut s.current_song, song).then_some(LibraryEvent::OnCurrentSongChange(song)))
    }

    pub fn set_songs(&self, songs: Vec<Song>) -> bool {
        self.update(|s| store(&mut s.songs, songs.clone()).then_some(LibraryEvent::OnSongsChange(songs)))
    }

    /// Replaces the whole state with `snapshot`, raising a typed event per
    /// field that differs. No wire changes are raised.
    pub fn replace(&self, snapshot: LibrarySnapshot) {
        let previous = std::mem::replace(&mut *self.state(), snapshot.clone());
        let events = [
            (previous.volume != snapshot.volume).then(|| LibraryEvent::OnVolumeChange(snapshot.volume)),
            (previous.is_playing != snapshot.is_playing).then(|| LibraryEvent::OnIsPlayingChange(snapshot.is_playing)),
            (previous.position != snapshot.position).then(|| LibraryEvent::OnPositionChange(snapshot.position)),
            (previous.current_song != snapshot.current_song)
                .then(|| LibraryEvent::OnCurrentSongChange(snapshot.current_song)),
            (previous.songs != snapshot.songs).then(|| LibraryEvent::OnSongsChange(snapshot.songs.clone())),
        ];
        for event in events.into_iter().flatten() {
            self.events.emit(&event);
        }
    }

    /// Observes typed library events.
    pub fn subscribe(&self, callback: impl Fn(&LibraryEvent) + Send + Sync + 'static) -> Subscription {
        self.events.subscribe(callback)
    }

    pub fn events(&self) -> (Subscription, mpsc::UnboundedReceiver<LibraryEvent>) {
        self.events.channel()
    }

    fn update(&self, mutate: impl FnOnce(&mut LibrarySnapshot) -> Option<LibraryEvent>) -> bool {
        let Some(event) = mutate(&mut self.state()) else { return false };
        self.events.emit(&event);
        match event.to_change() {
            Ok(change) => self.changes.emit(&change),
            Err(e) => tracing::warn!(operation = event.operation(), error = %e, "could not encode change"),
        }
        true
    }
}

/// Stores `value` in `slot`. True if it differed.
fn store<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

impl ChangeSource for LibraryRepo {
    fn subscribe_changes(&self, callback: Box<dyn Fn(&Change) + Send + Sync>) -> Subscription {
        self.changes.subscribe(callback)
    }
}

/// Applies `ILibraryRepo` messages to a [`LibraryRepo`].
pub struct LibraryService {
    repo: Arc<LibraryRepo>,
}

impl LibraryService {
    pub fn new(repo: Arc<LibraryRepo>) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &Arc<LibraryRepo> {
        &self.repo
    }
}

#[async_trait::async_trait]
impl Dispatcher for LibraryService {
    async fn handle(&self, topic: &Topic, payload: Option<&[u8]>) -> anyhow::Result<()> {
        anyhow::ensure!(topic.interface() == INTERFACE, "unknown interface {}", topic.interface());
        let payload = payload.ok_or_else(|| anyhow::anyhow!("{} carries no payload", topic))?;

        match topic.operation() {
            SEND_VOLUME_CHANGE => self.repo.set_volume(ownpack::from_bytes(payload)?),
            SEND_IS_PLAYING_CHANGE => self.repo.set_is_playing(ownpack::from_bytes(payload)?),
            SEND_POSITION_CHANGE => self.repo.set_position(ownpack::from_bytes(payload)?),
            SEND_CURRENT_SONG_CHANGE => self.repo.set_current_song(ownpack::from_bytes(payload)?),
            SEND_SONGS_CHANGE => self.repo.set_songs(ownpack::from_bytes(payload)?),
            other => anyhow::bail!("unknown operation {}.{}", INTERFACE, other),
        };
        Ok(())
    }

    async fn snapshot(&self) -> anyhow::Result<Bytes> {
        let mut enc = ownpack::Encoder::new();
        self.repo.snapshot().pack(&mut enc)?;
        Ok(Bytes::from(enc.into_bytes()))
    }

    async fn apply_snapshot(&self, snapshot: &[u8]) -> anyhow::Result<()> {
        let snapshot: LibrarySnapshot = ownpack::from_bytes(snapshot)?;
        tracing::debug!(songs = snapshot.songs.len(), volume = snapshot.volume, "applying snapshot");
        self.repo.replace(snapshot);
        Ok(())
    }

    fn accepts(&self, topic: &Topic) -> bool {
        topic.interface() == INTERFACE
    }
}
