//! # OwnPlayer
//!
//! The library side of a player instance, wired to the OwnTcp transport.
//! [`LibraryRepo`] holds the state, [`LibraryService`] applies remote
//! `ILibraryRepo` messages to it, and [`Player`] links it to a server or
//! client communicator.

pub mod library;
pub mod model;
pub mod player;

#[cfg(test)]
mod tests;

pub use library::LibraryEvent;
pub use library::LibraryRepo;
pub use library::LibraryService;
pub use model::LibrarySnapshot;
pub use model::Song;
pub use player::Mode;
pub use player::Player;
