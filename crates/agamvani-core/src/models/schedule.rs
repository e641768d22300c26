use serde::{Deserialize, Serialize};

use super::track::{NowPlayingTrack, ORIGINAL_CATEGORY};

/// One calendar day of programming, as returned by the daily-schedule endpoint.
///
/// The `current_*` pointers are denormalized: the server fills them at fetch
/// time, and [`ScheduleSnapshot::apply_now_playing`] keeps them fresh from the
/// now-playing poll so the whole schedule never has to be re-fetched for that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ScheduleSnapshot {
    pub date: String,
    #[serde(default)]
    pub current_slot: Option<String>,
    #[serde(default)]
    pub current_track_code: Option<String>,
    #[serde(default)]
    pub current_sequence_number: Option<i64>,
    #[serde(default)]
    pub slots: Vec<ScheduleSlot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ScheduleSlot {
    pub slot_name: String,
    #[serde(default)]
    pub slot_label: String,
    /// Seconds
    #[serde(default)]
    pub total_duration: f64,
    #[serde(default)]
    pub tracks: Vec<ScheduledTrack>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ScheduledTrack {
    pub id: i64,
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub sequence_number: i64,
}

fn default_category() -> String {
    ORIGINAL_CATEGORY.to_string()
}

impl ScheduleSnapshot {
    pub fn track_count(&self) -> usize {
        self.slots.iter().map(|s| s.tracks.len()).sum()
    }

    pub fn is_current_slot(&self, slot: &ScheduleSlot) -> bool {
        self.current_slot.as_deref() == Some(slot.slot_name.as_str())
    }

    /// Copy the schedule pointers carried by a now-playing track.
    ///
    /// Returns true if anything changed. Pointers the track doesn't carry are
    /// left alone.
    pub fn apply_now_playing(&mut self, track: &NowPlayingTrack) -> bool {
        let mut changed = false;
        if track.code.is_some() && self.current_track_code != track.code {
            self.current_track_code = track.code.clone();
            changed = true;
        }
        if track.sequence_number.is_some() && self.current_sequence_number != track.sequence_number {
            self.current_sequence_number = track.sequence_number;
            changed = true;
        }
        if track.current_slot.is_some() && self.current_slot != track.current_slot {
            self.current_slot = track.current_slot.clone();
            changed = true;
        }
        changed
    }

    /// Locate `track` in the schedule as `(slot index, track index)`.
    ///
    /// Supplemental audio is never highlighted. The same code can appear more
    /// than once in a day, so both code and sequence number must match. The
    /// current slot is searched first.
    pub fn current_position(&self, track: &NowPlayingTrack) -> Option<(usize, usize)> {
        if !track.is_original() {
            return None;
        }
        let code = track.code.as_deref()?;
        let sequence = track.sequence_number?;

        let matches = |t: &ScheduledTrack| t.code == code && t.sequence_number == sequence;

        let preferred = self
            .slots
            .iter()
            .position(|s| self.is_current_slot(s))
            .and_then(|si| {
                self.slots[si]
                    .tracks
                    .iter()
                    .position(|t| matches(t))
                    .map(|ti| (si, ti))
            });

        preferred.or_else(|| {
            self.slots.iter().enumerate().find_map(|(si, slot)| {
                slot.tracks.iter().position(|t| matches(t)).map(|ti| (si, ti))
            })
        })
    }

    /// The scheduled track after the one on air, crossing into the next
    /// slot when needed. Used to preload artwork ahead of time.
    pub fn next_track(&self, track: &NowPlayingTrack) -> Option<&ScheduledTrack> {
        let (si, ti) = self.current_position(track)?;
        self.slots[si]
            .tracks
            .get(ti + 1)
            .or_else(|| self.slots[si + 1..].iter().find_map(|s| s.tracks.first()))
    }
}
