use std::sync::Arc;
use std::sync::Mutex;

use bytes::Bytes;
use chrono::TimeDelta;
use uuid::Uuid;

use owntcp::Change;
use owntcp::ChangeSource;
use owntcp::Dispatcher;
use owntcp::Topic;

use crate::library::INTERFACE;
use crate::library::SEND_SONGS_CHANGE;
use crate::library::SEND_VOLUME_CHANGE;
use crate::*;

fn collect_changes(repo: &LibraryRepo) -> (owntcp::Subscription, Arc<Mutex<Vec<Change>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sub = repo.subscribe_changes(Box::new({
        let seen = seen.clone();
        move |change: &Change| seen.lock().unwrap().push(change.clone())
    }));
    (sub, seen)
}

fn song(title: &str) -> Song {
    Song::new(format!("/music/{}.flac", title), title, TimeDelta::milliseconds(183_250)).with_artist("Someone")
}

// ============================================================================
//  MODEL
// ============================================================================

#[test]
fn test_snapshot_record_round_trip() {
    let first = song("one");
    let snapshot = LibrarySnapshot {
        volume: 0.25,
        is_playing: true,
        position: TimeDelta::milliseconds(61_500),
        current_song: Some(first.id),
        songs: vec![first, Song::new("/music/two.mp3", "two", TimeDelta::seconds(90))],
    };

    let bytes = ownpack::to_bytes(&snapshot).unwrap();
    assert_eq!(ownpack::from_bytes::<LibrarySnapshot>(&bytes).unwrap(), snapshot);
}

#[test]
fn test_song_without_artist_writes_null_string() {
    let mut untitled = Song::new("/a", "b", TimeDelta::zero());
    untitled.id = Uuid::nil();
    let bytes = ownpack::to_bytes(&untitled).unwrap();

    // guid, "/a", "b", then the -1 null length.
    let artist_at = 16 + (4 + 2) + (4 + 1);
    assert_eq!(&bytes[artist_at..artist_at + 4], &(-1i32).to_le_bytes());
}

// ============================================================================
//  REPOSITORY
// ============================================================================

#[test]
fn test_mutation_raises_typed_event_and_wire_change() {
    let repo = LibraryRepo::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let _events = repo.subscribe({
        let events = events.clone();
        move |event: &LibraryEvent| events.lock().unwrap().push(event.clone())
    });
    let (_changes, changes) = collect_changes(&repo);

    assert!(repo.set_volume(0.5));

    assert_eq!(*events.lock().unwrap(), vec![LibraryEvent::OnVolumeChange(0.5)]);
    let changes = changes.lock().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].topic.to_wire(), "ILibraryRepo.SendVolumeChange");
    assert_eq!(changes[0].payload.as_deref(), Some(&0.5f32.to_le_bytes()[..]));
}

#[test]
fn test_unchanged_value_raises_nothing() {
    let repo = LibraryRepo::new();
    let (_changes, changes) = collect_changes(&repo);

    assert!(repo.set_is_playing(true));
    assert!(!repo.set_is_playing(true));
    assert!(!repo.set_current_song(None));
    assert_eq!(changes.lock().unwrap().len(), 1);
}

#[test]
fn test_replace_raises_only_typed_events() {
    let repo = LibraryRepo::new();
    let (_changes, changes) = collect_changes(&repo);
    let (_events, mut events) = repo.events();

    let snapshot = LibrarySnapshot { volume: 0.1, ..LibrarySnapshot::default() };
    repo.replace(snapshot.clone());

    assert_eq!(repo.snapshot(), snapshot);
    assert_eq!(events.try_recv().unwrap(), LibraryEvent::OnVolumeChange(0.1));
    assert!(events.try_recv().is_err());
    assert!(changes.lock().unwrap().is_empty());
}

// ============================================================================
//  SERVICE
// ============================================================================

#[tokio::test]
async fn test_service_applies_wire_change() {
    let repo = Arc::new(LibraryRepo::new());
    let service = LibraryService::new(repo.clone());
    let songs = vec![song("x")];

    let topic = Topic::new(INTERFACE, SEND_SONGS_CHANGE).unwrap();
    let payload = ownpack::to_bytes(&songs).unwrap();
    service.handle(&topic, Some(payload.as_slice())).await.unwrap();

    assert_eq!(repo.songs(), songs);
}

#[tokio::test]
async fn test_service_rejects_unknown_operation() {
    let service = LibraryService::new(Arc::new(LibraryRepo::new()));
    let topic = Topic::new(INTERFACE, "SendShuffleChange").unwrap();
    let err = service.handle(&topic, Some(&[1u8][..])).await.unwrap_err();
    assert!(err.to_string().contains("SendShuffleChange"));
}

#[tokio::test]
async fn test_service_rejects_missing_or_bad_payload() {
    let service = LibraryService::new(Arc::new(LibraryRepo::new()));
    let topic = Topic::new(INTERFACE, SEND_VOLUME_CHANGE).unwrap();
    assert!(service.handle(&topic, None).await.is_err());
    assert!(service.handle(&topic, Some(&[0u8, 0][..])).await.is_err());
}

#[tokio::test]
async fn test_service_accepts_only_library_topics() {
    let service = LibraryService::new(Arc::new(LibraryRepo::new()));
    assert!(service.accepts(&Topic::new(INTERFACE, SEND_VOLUME_CHANGE).unwrap()));
    assert!(!service.accepts(&Topic::new("IPlaylistRepo", "SendNameChange").unwrap()));
}

#[tokio::test]
async fn test_snapshot_moves_state_between_services() {
    let source = Arc::new(LibraryRepo::new());
    source.set_volume(0.3);
    source.set_songs(vec![song("a"), song("b")]);
    let target = Arc::new(LibraryRepo::new());

    let snapshot: Bytes = LibraryService::new(source.clone()).snapshot().await.unwrap();
    LibraryService::new(target.clone()).apply_snapshot(&snapshot).await.unwrap();

    assert_eq!(target.snapshot(), source.snapshot());
}

#[tokio::test]
async fn test_standalone_player_has_no_link() {
    let player = Player::start(Mode::Standalone, Arc::new(LibraryRepo::new()), owntcp::Config::default())
        .await
        .unwrap();
    assert!(player.client().is_none());
    assert!(player.server().is_none());
    assert!(player.repo().set_volume(0.2));
    player.stop().await;
}
