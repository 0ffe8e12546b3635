//! Library records as they travel between player instances.

use chrono::DateTime;
use chrono::SubsecRound;
use chrono::TimeDelta;
use chrono::Utc;
use ownpack::Decoder;
use ownpack::Encoder;
use ownpack::Pack;
use ownpack::Unpack;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub id: Uuid,
    pub path: String,
    pub title: String,
    pub artist: Option<String>,
    pub duration: TimeDelta,
    pub added: DateTime<Utc>,
}

impl Song {
    /// A new song with a fresh id, added now.
    pub fn new(path: impl Into<String>, title: impl Into<String>, duration: TimeDelta) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            title: title.into(),
            artist: None,
            duration,
            // Timestamps travel as 100ns ticks.
            added: Utc::now().trunc_subsecs(7),
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }
}

impl Pack for Song {
    fn pack(&self, enc: &mut Encoder) -> ownpack::Result<()> {
        enc.guid(&self.id);
        enc.str(&self.path)?;
        enc.str(&self.title)?;
        enc.opt_str(self.artist.as_deref())?;
        enc.time_span(&self.duration)?;
        enc.date_time(&self.added)
    }
}

impl Unpack for Song {
    fn unpack(dec: &mut Decoder<'_>) -> ownpack::Result<Self> {
        Ok(Self {
            id: dec.guid()?,
            path: dec.str()?.to_owned(),
            title: dec.str()?.to_owned(),
            artist: dec.opt_str()?.map(str::to_owned),
            duration: dec.time_span()?,
            added: dec.date_time()?,
        })
    }
}

/// Full library state, sent to a client right after it connects.
#[derive(Debug, Clone, PartialEq)]
pub struct LibrarySnapshot {
    pub volume: f32,
    pub is_playing: bool,
    pub position: TimeDelta,
    pub current_song: Option<Uuid>,
    pub songs: Vec<Song>,
}

impl Default for LibrarySnapshot {
    fn default() -> Self {
        Self {
            volume: 1.0,
            is_playing: false,
            position: TimeDelta::zero(),
            current_song: None,
            songs: Vec::new(),
        }
    }
}

impl Pack for LibrarySnapshot {
    fn pack(&self, enc: &mut Encoder) -> ownpack::Result<()> {
        enc.f32(self.volume);
        enc.bool(self.is_playing);
        enc.time_span(&self.position)?;
        self.current_song.pack(enc)?;
        self.songs.pack(enc)
    }
}

impl Unpack for LibrarySnapshot {
    fn unpack(dec: &mut Decoder<'_>) -> ownpack::Result<Self> {
        Ok(Self {
            volume: dec.f32()?,
            is_playing: dec.bool()?,
            position: dec.time_span()?,
            current_song: Option::unpack(dec)?,
            songs: Vec::unpack(dec)?,
        })
    }
}
