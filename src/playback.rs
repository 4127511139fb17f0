// Playback tracking
// Turns host player events into now playing notifications and scrobbles

use crate::scrobbler::TrackInfo;
use crate::text_cleanup::TextCleaner;
use serde::Deserialize;

const MIN_TRACK_DURATION: f64 = 30.0; // Minimum track duration in seconds to scrobble
const SCROBBLE_TIME_THRESHOLD: f64 = 240.0; // 4 minutes in seconds

/// Metadata of a track that just started
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NewTrack {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub album_artist: String,
    /// Length in seconds as reported by the player
    pub length: f64,
    pub track_number: u32,
}

/// Events delivered by the host player
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlaybackEvent {
    NewTrack(NewTrack),
    Position { elapsed: f64 },
    Seek { position: f64 },
    Stop,
    Pause {
        #[serde(default)]
        paused: bool,
    },
}

/// What the service should do in response to an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackAction {
    NowPlaying(TrackInfo),
    Scrobble(TrackInfo),
}

/// The track currently being played
#[derive(Debug, Clone)]
struct PlaySession {
    track: TrackInfo,
    threshold: f64,
    scrobbled: bool,
}

impl PlaySession {
    /// Check if track should be scrobbled based on Last.fm rules
    fn should_scrobble(&self, elapsed: f64) -> bool {
        !self.scrobbled && elapsed >= self.threshold
    }
}

pub struct PlaybackTracker {
    enabled: bool,
    threshold_percent: u8,
    text_cleaner: TextCleaner,
    current: Option<PlaySession>,
}

impl PlaybackTracker {
    pub fn new(enabled: bool, threshold_percent: u8, text_cleaner: TextCleaner) -> Self {
        Self {
            enabled,
            threshold_percent,
            text_cleaner,
            current: None,
        }
    }

    /// Feed one player event. `now` is the current time in epoch seconds.
    pub fn handle(&mut self, event: PlaybackEvent, authenticated: bool, now: i64) -> Option<PlaybackAction> {
        match event {
            PlaybackEvent::NewTrack(new_track) => self.on_new_track(new_track, authenticated, now),
            PlaybackEvent::Position { elapsed } => self.on_position(elapsed, authenticated, now),
            PlaybackEvent::Seek { position } => {
                if let Some(session) = self.current.as_mut() {
                    // Seeking back below the threshold allows another scrobble
                    if position < session.threshold {
                        session.scrobbled = false;
                    }
                }
                None
            }
            PlaybackEvent::Stop => {
                if self.current.take().is_some() {
                    log::debug!("Playback stopped, clearing current track");
                }
                None
            }
            // Elapsed time does not advance while paused
            PlaybackEvent::Pause { .. } => None,
        }
    }

    fn on_new_track(&mut self, new_track: NewTrack, authenticated: bool, now: i64) -> Option<PlaybackAction> {
        self.current = None;
        if !self.enabled || !authenticated {
            return None;
        }

        let length = new_track.length;
        if !(length.is_finite() && length > 0.0) {
            log::info!("Track length invalid or missing, skipping");
            return None;
        }

        let track = self.text_cleaner.clean_track(
            TrackInfo::new(new_track.artist, new_track.title)
                .with_album(new_track.album)
                .with_album_artist(new_track.album_artist)
                .with_duration(length as u32)
                .with_track_number(new_track.track_number)
                .with_timestamp(now),
        );

        if !track.has_required_fields() {
            log::info!("Missing artist or title, skipping track");
            return None;
        }

        if length < MIN_TRACK_DURATION {
            log::debug!("Track shorter than {}s, not scrobbling: {}", MIN_TRACK_DURATION, track);
            return None;
        }

        // Scrobble after 50% (configurable) of the track OR 4 minutes, whichever comes first
        let threshold = (f64::from(self.threshold_percent) / 100.0 * length).min(SCROBBLE_TIME_THRESHOLD);

        log::info!("New track: {} ({}s)", track, track.duration);
        self.current = Some(PlaySession {
            track: track.clone(),
            threshold,
            scrobbled: false,
        });

        Some(PlaybackAction::NowPlaying(track))
    }

    fn on_position(&mut self, elapsed: f64, authenticated: bool, now: i64) -> Option<PlaybackAction> {
        if !self.enabled {
            return None;
        }
        let session = self.current.as_mut()?;
        if !session.should_scrobble(elapsed) {
            return None;
        }

        session.scrobbled = true;
        if !authenticated {
            return None;
        }

        // The scrobble timestamp is when this play started
        let track = session.track.clone().with_timestamp(now - elapsed as i64);
        log::info!(
            "Scrobbling: {} (played {:.0}s / {}s)",
            track,
            elapsed,
            track.duration
        );
        Some(PlaybackAction::Scrobble(track))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CleanupConfig;

    fn tracker() -> PlaybackTracker {
        PlaybackTracker::new(true, 50, TextCleaner::new(&CleanupConfig::default()))
    }

    fn new_track(length: f64) -> PlaybackEvent {
        PlaybackEvent::NewTrack(NewTrack {
            artist: "Artist".to_string(),
            title: "Title [Explicit]".to_string(),
            album: "Album".to_string(),
            album_artist: String::new(),
            length,
            track_number: 3,
        })
    }

    #[test]
    fn now_playing_then_scrobble_at_threshold() {
        let mut tracker = tracker();
        let action = tracker.handle(new_track(200.0), true, 1000);
        let Some(PlaybackAction::NowPlaying(track)) = action else {
            panic!("expected now playing, got {:?}", action);
        };
        assert_eq!(track.title, "Title");
        assert_eq!(track.duration, 200);

        assert_eq!(tracker.handle(PlaybackEvent::Position { elapsed: 99.0 }, true, 1099), None);
        let action = tracker.handle(PlaybackEvent::Position { elapsed: 100.0 }, true, 1100);
        let Some(PlaybackAction::Scrobble(track)) = action else {
            panic!("expected scrobble, got {:?}", action);
        };
        assert_eq!(track.timestamp, 1000);
        assert_eq!(track.track_number, 3);

        assert_eq!(tracker.handle(PlaybackEvent::Position { elapsed: 150.0 }, true, 1150), None);
    }

    #[test]
    fn threshold_caps_at_four_minutes() {
        let mut tracker = tracker();
        tracker.handle(new_track(1200.0), true, 0);
        assert_eq!(tracker.handle(PlaybackEvent::Position { elapsed: 239.0 }, true, 239), None);
        assert!(matches!(
            tracker.handle(PlaybackEvent::Position { elapsed: 240.0 }, true, 240),
            Some(PlaybackAction::Scrobble(_))
        ));
    }

    #[test]
    fn seek_back_rearms_scrobble() {
        let mut tracker = tracker();
        tracker.handle(new_track(100.0), true, 0);
        assert!(tracker.handle(PlaybackEvent::Position { elapsed: 60.0 }, true, 60).is_some());
        tracker.handle(PlaybackEvent::Seek { position: 10.0 }, true, 61);
        assert!(tracker.handle(PlaybackEvent::Position { elapsed: 55.0 }, true, 106).is_some());
    }

    #[test]
    fn skipped_tracks() {
        let mut tracker = tracker();
        assert_eq!(tracker.handle(new_track(0.0), true, 0), None);
        assert_eq!(tracker.handle(new_track(f64::NAN), true, 0), None);
        assert_eq!(tracker.handle(new_track(20.0), true, 0), None);
        assert_eq!(tracker.handle(PlaybackEvent::Position { elapsed: 20.0 }, true, 20), None);
        assert_eq!(tracker.handle(new_track(200.0), false, 0), None);

        let missing = PlaybackEvent::NewTrack(NewTrack {
            title: "Only title".to_string(),
            length: 200.0,
            ..NewTrack::default()
        });
        assert_eq!(tracker.handle(missing, true, 0), None);
    }

    #[test]
    fn stop_clears_and_disabled_ignores() {
        let mut tracker = tracker();
        tracker.handle(new_track(200.0), true, 0);
        tracker.handle(PlaybackEvent::Stop, true, 10);
        assert_eq!(tracker.handle(PlaybackEvent::Position { elapsed: 150.0 }, true, 150), None);

        let mut disabled = PlaybackTracker::new(false, 50, TextCleaner::disabled());
        assert_eq!(disabled.handle(new_track(200.0), true, 0), None);
    }

    #[test]
    fn events_parse_from_json_lines() {
        let event: PlaybackEvent = serde_json::from_str(
            r#"{"event":"new_track","artist":"A","title":"T","length":180.5}"#,
        )
        .unwrap();
        assert!(matches!(event, PlaybackEvent::NewTrack(NewTrack { length, .. }) if length == 180.5));

        let event: PlaybackEvent = serde_json::from_str(r#"{"event":"position","elapsed":12}"#).unwrap();
        assert_eq!(event, PlaybackEvent::Position { elapsed: 12.0 });
        let event: PlaybackEvent = serde_json::from_str(r#"{"event":"stop"}"#).unwrap();
        assert_eq!(event, PlaybackEvent::Stop);
    }
}
