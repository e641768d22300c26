use serde::{Deserialize, Serialize};

use crate::utils::format_duration;

/// Category tag for primary satsang recordings. Anything else is
/// supplemental audio (announcements, fillers, ...).
pub const ORIGINAL_CATEGORY: &str = "original";

/// The track currently on air, as reported by the now-playing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct NowPlayingTrack {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub category: String,
    /// Length in seconds
    #[serde(default)]
    pub duration: f64,
    /// Schedule code of the track; equal codes may repeat within a day
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub sequence_number: Option<i64>,
    #[serde(default)]
    pub current_slot: Option<String>,
}

impl NowPlayingTrack {
    pub fn is_original(&self) -> bool {
        self.category == ORIGINAL_CATEGORY
    }

    /// Identity used for track-change detection.
    pub fn is_same_track(&self, other: &NowPlayingTrack) -> bool {
        self.id == other.id
    }

    /// Key for the artwork cache. Falls back to the id when the server
    /// didn't send a schedule code.
    pub fn artwork_code(&self) -> String {
        self.code.clone().unwrap_or_else(|| self.id.to_string())
    }

    pub fn display_title(&self) -> String {
        match self.artist.as_deref() {
            Some(artist) if !artist.is_empty() => format!("{} - {}", self.title, artist),
            _ => self.title.clone(),
        }
    }

    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration)
    }
}

/// Body of `GET /api/radio/now-playing`.
///
/// A missing `track` means nothing changed on the server side.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NowPlayingResponse {
    #[serde(default)]
    pub track: Option<NowPlayingTrack>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_now_playing_response() {
        let json = r#"{"track": {"id": 1, "title": "Bhajan 1", "category": "original", "duration": 180}}"#;
        let resp: NowPlayingResponse = serde_json::from_str(json)
            .expect("Failed to parse now-playing test JSON");
        let track = resp.track.expect("track should be present");
        assert_eq!(track.id, 1);
        assert_eq!(track.title, "Bhajan 1");
        assert!(track.is_original());
        assert_eq!(track.artist, None);
        assert_eq!(track.formatted_duration(), "3:00");
    }

    #[test]
    fn test_parse_response_without_track() {
        let resp: NowPlayingResponse = serde_json::from_str(r#"{"status": "idle"}"#)
            .expect("Failed to parse empty now-playing JSON");
        assert!(resp.track.is_none());
    }

    #[test]
    fn test_parse_track_with_schedule_pointers() {
        let json = r#"{"track": {"id": 7, "title": "Pad 12", "artist": "Sabha", "thumbnail": "/radio/thumbnails/p12.jpg",
            "category": "announcement", "duration": 42.5, "code": "P12", "sequence_number": 3, "current_slot": "morning"}}"#;
        let track = serde_json::from_str::<NowPlayingResponse>(json)
            .expect("Failed to parse now-playing JSON")
            .track
            .expect("track should be present");
        assert!(!track.is_original());
        assert_eq!(track.artwork_code(), "P12");
        assert_eq!(track.sequence_number, Some(3));
        assert_eq!(track.display_title(), "Pad 12 - Sabha");
    }

    #[test]
    fn test_identity_is_by_id() {
        let a = NowPlayingTrack {
            id: 1,
            title: "A".into(),
            artist: None,
            thumbnail: None,
            category: ORIGINAL_CATEGORY.into(),
            duration: 10.0,
            code: None,
            sequence_number: None,
            current_slot: None,
        };
        let mut renamed = a.clone();
        renamed.title = "A (remastered)".into();
        assert!(a.is_same_track(&renamed));
        assert_eq!(a.artwork_code(), "1");

        let mut other = a.clone();
        other.id = 2;
        assert!(!a.is_same_track(&other));
    }
}
