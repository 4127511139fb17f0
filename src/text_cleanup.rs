// Text cleanup module
// Strips configured regex patterns from track metadata before it is sent

use crate::config::CleanupConfig;
use crate::scrobbler::TrackInfo;
use regex::Regex;

pub struct TextCleaner {
    patterns: Vec<Regex>,
}

impl TextCleaner {
    /// Compile the configured patterns; invalid ones are logged and skipped
    pub fn new(config: &CleanupConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let patterns = config
            .patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("Invalid regex pattern '{}': {}", pattern, e);
                    None
                }
            })
            .collect();

        Self { patterns }
    }

    pub fn disabled() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Remove every pattern from `text` and trim the result
    pub fn clean(&self, text: &str) -> String {
        if self.patterns.is_empty() {
            return text.to_string();
        }

        let cleaned = self
            .patterns
            .iter()
            .fold(text.to_string(), |acc, pattern| {
                pattern.replace_all(&acc, "").into_owned()
            });

        cleaned.trim().to_string()
    }

    /// Clean the text fields of a track
    pub fn clean_track(&self, track: TrackInfo) -> TrackInfo {
        TrackInfo {
            artist: self.clean(&track.artist),
            title: self.clean(&track.title),
            album: self.clean(&track.album),
            album_artist: self.clean(&track.album_artist),
            ..track
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_patterns_strip_explicit_markers() {
        let cleaner = TextCleaner::new(&CleanupConfig::default());
        assert_eq!(cleaner.clean("Song [Explicit]"), "Song");
        assert_eq!(cleaner.clean("Album (Clean)"), "Album");
        assert_eq!(cleaner.clean("Track - Explicit"), "Track");
        assert_eq!(cleaner.clean("Plain"), "Plain");
    }

    #[test]
    fn cleans_all_text_fields() {
        let cleaner = TextCleaner::new(&CleanupConfig::default());
        let track = TrackInfo::new("Artist", "Song [Explicit]")
            .with_album("Album (Explicit)")
            .with_duration(180);
        let cleaned = cleaner.clean_track(track);
        assert_eq!(cleaned.title, "Song");
        assert_eq!(cleaned.album, "Album");
        assert_eq!(cleaned.duration, 180);
    }

    #[test]
    fn disabled_and_invalid_patterns() {
        let disabled = TextCleaner::new(&CleanupConfig {
            enabled: false,
            ..CleanupConfig::default()
        });
        assert_eq!(disabled.clean(" Song [Explicit] "), " Song [Explicit] ");

        let partial = TextCleaner::new(&CleanupConfig {
            enabled: true,
            patterns: vec!["([".to_string(), r"\s*!+".to_string()],
        });
        assert_eq!(partial.clean("Hey!!"), "Hey");
    }
}
