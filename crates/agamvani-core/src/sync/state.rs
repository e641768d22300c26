use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::api::FetchError;
use crate::models::{NowPlayingTrack, ScheduleSnapshot};

/// Timings for the now-playing poll and the cache entries it writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    /// Should exceed `poll_interval` so the cache answers between polls.
    pub now_playing_ttl: Duration,
    pub schedule_ttl: Duration,
    pub request_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            now_playing_ttl: Duration::from_secs(30),
            schedule_ttl: Duration::from_secs(300),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Value stored in the shared cache by the synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedRadio {
    NowPlaying(NowPlayingTrack),
    Schedule(ScheduleSnapshot),
}

/// What consumers see for the live stream.
///
/// After a failed poll the last good track stays published with `stale` set,
/// rather than blanking the display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveState {
    pub track: Option<NowPlayingTrack>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub stale: bool,
    pub last_error: Option<FetchError>,
}

/// Broadcast to subscribers of [`super::RadioSync::events`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A track with a new id was observed. `previous_id` is `None` for the
    /// first track after start or a reset.
    TrackChanged {
        previous_id: Option<i64>,
        track: NowPlayingTrack,
    },
    ScheduleUpdated {
        date: String,
    },
    PollFailed(FetchError),
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Fresh value served from the cache, no network call.
    CacheHit,
    /// Network fetch returned a track; `changed` marks a track-change event.
    Updated { changed: bool },
    /// 2xx without a track: nothing changed.
    NoTrack,
    Failed(FetchError),
    /// Superseded by a stop or reset while in flight.
    Discarded,
}

#[derive(Debug, Default)]
pub(crate) struct SyncCounters {
    pub polls: AtomicU64,
    pub cache_hits: AtomicU64,
    pub network_fetches: AtomicU64,
    pub track_changes: AtomicU64,
    pub failures: AtomicU64,
    pub discarded: AtomicU64,
}

impl SyncCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncStats {
        SyncStats {
            polls: self.polls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            track_changes: self.track_changes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub polls: u64,
    pub cache_hits: u64,
    pub network_fetches: u64,
    /// Track-change events, each of which invalidated the now-playing entry.
    pub track_changes: u64,
    pub failures: u64,
    pub discarded: u64,
}
