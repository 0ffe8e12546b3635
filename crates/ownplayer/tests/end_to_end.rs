use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::mpsc::UnboundedReceiver;

use ownplayer::LibraryEvent;
use ownplayer::LibraryRepo;
use ownplayer::Mode;
use ownplayer::Player;
use ownplayer::Song;
use owntcp::Config;
use owntcp::State;

async fn server() -> Player {
    let mode = Mode::Server { addr: "127.0.0.1:0".into() };
    Player::start(mode, Arc::new(LibraryRepo::new()), Config::default()).await.unwrap()
}

async fn client(server: &Player) -> Player {
    let addr = server.local_addr().unwrap().to_string();
    Player::start(Mode::Client { addr }, Arc::new(LibraryRepo::new()), Config::default()).await.unwrap()
}

async fn next_event(events: &mut UnboundedReceiver<LibraryEvent>) -> LibraryEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_volume_change_reaches_second_client_without_echo() {
    let server = server().await;
    let first = client(&server).await;
    let second = client(&server).await;

    assert_eq!(first.client().unwrap().state(), State::Synced);
    assert_eq!(second.client().unwrap().state(), State::Synced);
    assert_eq!(first.repo().snapshot(), server.repo().snapshot());

    let (_first_sub, mut first_events) = first.repo().events();
    let (_second_sub, mut second_events) = second.repo().events();
    let (_server_sub, mut server_events) = server.repo().events();

    assert!(first.repo().set_volume(0.5));
    assert_eq!(next_event(&mut first_events).await, LibraryEvent::OnVolumeChange(0.5));

    assert_eq!(next_event(&mut second_events).await, LibraryEvent::OnVolumeChange(0.5));
    assert_eq!(next_event(&mut server_events).await, LibraryEvent::OnVolumeChange(0.5));

    // Nothing comes back to the originator, and nobody sees the change twice.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(first_events.try_recv().is_err());
    assert!(second_events.try_recv().is_err());
    assert!(server_events.try_recv().is_err());
    assert_eq!(first.client().unwrap().state(), State::Synced);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_client_receives_current_library() {
    let server = server().await;
    let song = Song::new("/music/late.ogg", "Late", TimeDelta::seconds(200));
    server.repo().set_songs(vec![song.clone()]);
    server.repo().set_current_song(Some(song.id));
    server.repo().set_is_playing(true);

    let late = client(&server).await;
    assert_eq!(late.repo().snapshot(), server.repo().snapshot());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_side_change_reaches_clients() {
    let server = server().await;
    let a = client(&server).await;
    let b = client(&server).await;
    let (_a_sub, mut a_events) = a.repo().events();
    let (_b_sub, mut b_events) = b.repo().events();

    server.repo().set_position(TimeDelta::seconds(42));

    assert_eq!(next_event(&mut a_events).await, LibraryEvent::OnPositionChange(TimeDelta::seconds(42)));
    assert_eq!(next_event(&mut b_events).await, LibraryEvent::OnPositionChange(TimeDelta::seconds(42)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_stop_disconnects_player() {
    let server = server().await;
    let mut follower = client(&server).await;

    server.stop().await;
    let event = tokio::time::timeout(Duration::from_secs(2), follower.disconnected()).await.unwrap();
    assert!(event.expected);
}
