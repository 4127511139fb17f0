// Track metadata shared by now playing, scrobbles and the delivery queue

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single play of a track
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    #[serde(default)]
    pub artist: String,
    #[serde(default, rename = "track")]
    pub title: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub album_artist: String,
    /// Duration in seconds, 0 when unknown
    #[serde(default)]
    pub duration: u32,
    /// 0 when unknown
    #[serde(default)]
    pub track_number: u32,
    /// Epoch seconds at which playback of this instance began
    #[serde(default)]
    pub timestamp: i64,
}

impl TrackInfo {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = album.into();
        self
    }

    pub fn with_album_artist(mut self, album_artist: impl Into<String>) -> Self {
        self.album_artist = album_artist.into();
        self
    }

    pub fn with_duration(mut self, duration: u32) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_track_number(mut self, track_number: u32) -> Self {
        self.track_number = track_number;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Artist and title are required by the API
    pub fn has_required_fields(&self) -> bool {
        !self.artist.is_empty() && !self.title.is_empty()
    }

    /// Request parameters describing this track; optional fields are omitted when empty
    pub(crate) fn request_params(&self, params: &mut BTreeMap<String, String>) {
        params.insert("artist".to_string(), self.artist.clone());
        params.insert("track".to_string(), self.title.clone());
        if !self.album.is_empty() {
            params.insert("album".to_string(), self.album.clone());
        }
        if !self.album_artist.is_empty() {
            params.insert("albumArtist".to_string(), self.album_artist.clone());
        }
        if self.duration > 0 {
            params.insert("duration".to_string(), self.duration.to_string());
        }
        if self.track_number > 0 {
            params.insert("trackNumber".to_string(), self.track_number.to_string());
        }
    }
}

impl std::fmt::Display for TrackInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}
