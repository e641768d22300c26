use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::{FetchError, RadioSource};
use crate::cache::CacheStore;
use crate::models::{NowPlayingResponse, NowPlayingTrack, ScheduleSnapshot};

use super::state::{
    CachedRadio, LiveState, PollOutcome, SyncCounters, SyncEvent, SyncSettings, SyncStats,
};

/// Cache key for the track on air.
pub const NOW_PLAYING_KEY: &str = "now-playing";

/// Matches every per-day schedule key.
pub const SCHEDULE_KEY_PATTERN: &str = "schedule:*";

/// Buffer for track-change and schedule events.
/// Slow subscribers lag and skip rather than hold up the poller.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Cache key for the schedule of `date`.
pub fn schedule_key(date: NaiveDate) -> String {
    format!("schedule:{}", date.format("%Y-%m-%d"))
}

/// Cache shared between the synchronizer and its readers.
pub type RadioCache = CacheStore<CachedRadio>;

struct PollLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Counts in-progress schedule fetches for the lifetime of the guard.
struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Single shared poller for live radio state.
///
/// One instance polls the now-playing endpoint on a fixed interval and fans
/// the result out to any number of consumers through a `watch` channel,
/// so the network is hit once per cycle no matter how many screens are
/// reading. It is the only writer of the `now-playing` and `schedule:*`
/// cache keys.
pub struct RadioSync {
    source: Arc<dyn RadioSource>,
    cache: Arc<RadioCache>,
    settings: SyncSettings,

    last_track_id: Mutex<Option<i64>>,
    /// Advanced by stop and resets; a poll finishing under an older value
    /// is discarded.
    generation: AtomicU64,
    /// Held for the whole poll cycle so only one now-playing request is in
    /// flight at a time.
    poll_lock: tokio::sync::Mutex<()>,
    /// Advanced by `clear_cache` and `invalidate_schedule`; a schedule fetch
    /// landing under an older value is not cached.
    schedule_generation: AtomicU64,
    schedule_loading: AtomicUsize,

    live_tx: watch::Sender<LiveState>,
    schedule_tx: watch::Sender<Option<ScheduleSnapshot>>,
    events_tx: broadcast::Sender<SyncEvent>,

    counters: SyncCounters,
    poll_loop: Mutex<Option<PollLoop>>,
}

impl RadioSync {
    pub fn new(source: Arc<dyn RadioSource>, cache: Arc<RadioCache>, settings: SyncSettings) -> Self {
        let (live_tx, _) = watch::channel(LiveState::default());
        let (schedule_tx, _) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            source,
            cache,
            settings,
            last_track_id: Mutex::new(None),
            generation: AtomicU64::new(0),
            poll_lock: tokio::sync::Mutex::new(()),
            schedule_generation: AtomicU64::new(0),
            schedule_loading: AtomicUsize::new(0),
            live_tx,
            schedule_tx,
            events_tx,
            counters: SyncCounters::default(),
            poll_loop: Mutex::new(None),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the poll loop: one poll right away, then one per interval.
    /// Calling this while the loop is running does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.poll_loop.lock();
        if running.as_ref().is_some_and(|l| !l.handle.is_finished()) {
            debug!("Now-playing poll loop already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let weak = Arc::downgrade(self);
        let interval = self.settings.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                let Some(sync) = weak.upgrade() else { break };
                sync.poll_once().await;
            }
            debug!("Now-playing poll loop exited");
        });

        *running = Some(PollLoop { shutdown, handle });
        info!(interval = ?interval, "Now-playing poll loop started");
    }

    /// Stop the poll loop. No poll starts after this returns; a poll already
    /// in flight completes and its result is discarded.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(poll_loop) = self.poll_loop.lock().take() {
            let _ = poll_loop.shutdown.send(true);
            info!("Now-playing poll loop stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.poll_loop
            .lock()
            .as_ref()
            .is_some_and(|l| !l.handle.is_finished())
    }

    // =========================================================================
    // Now playing
    // =========================================================================

    /// Run one poll cycle. The interval loop and forced refreshes both go
    /// through here.
    pub async fn poll_once(&self) -> PollOutcome {
        let _in_flight = self.poll_lock.lock().await;
        let generation = self.generation.load(Ordering::SeqCst);
        SyncCounters::bump(&self.counters.polls);

        if let Some(CachedRadio::NowPlaying(track)) = self.cache.get(NOW_PLAYING_KEY) {
            SyncCounters::bump(&self.counters.cache_hits);
            self.publish_cached(track);
            return PollOutcome::CacheHit;
        }

        SyncCounters::bump(&self.counters.network_fetches);
        let result = match time::timeout(self.settings.request_timeout, self.source.now_playing()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            SyncCounters::bump(&self.counters.discarded);
            debug!("Discarding now-playing result from a superseded poll");
            return PollOutcome::Discarded;
        }

        match result {
            Ok(NowPlayingResponse { track: Some(track) }) => {
                let changed = self.apply_track(track);
                PollOutcome::Updated { changed }
            }
            Ok(_) => {
                debug!("Now-playing response without a track");
                PollOutcome::NoTrack
            }
            Err(e) => {
                SyncCounters::bump(&self.counters.failures);
                warn!(error = %e, "Failed to fetch now playing");
                self.live_tx.send_modify(|state| {
                    state.stale = true;
                    state.last_error = Some(e.clone());
                });
                let _ = self.events_tx.send(SyncEvent::PollFailed(e.clone()));
                PollOutcome::Failed(e)
            }
        }
    }

    /// Record a freshly fetched track: invalidate on a track change, write
    /// the cache, then publish. Returns whether this was a track change.
    fn apply_track(&self, track: NowPlayingTrack) -> bool {
        let previous_id = self.last_track_id.lock().replace(track.id);
        let changed = matches!(previous_id, Some(id) if id != track.id);

        if changed {
            // Drop the old entry before the write so no reader can pair the
            // new id with old cached data.
            self.cache.invalidate(NOW_PLAYING_KEY);
            SyncCounters::bump(&self.counters.track_changes);
            info!(id = track.id, title = %track.title, "Track changed");
        }

        self.cache.set_with_ttl(
            NOW_PLAYING_KEY,
            CachedRadio::NowPlaying(track.clone()),
            self.settings.now_playing_ttl,
        );

        self.live_tx.send_modify(|state| {
            state.track = Some(track.clone());
            state.fetched_at = Some(Utc::now());
            state.stale = false;
            state.last_error = None;
        });
        self.schedule_tx
            .send_if_modified(|schedule| schedule.as_mut().is_some_and(|s| s.apply_now_playing(&track)));

        if previous_id != Some(track.id) {
            let _ = self.events_tx.send(SyncEvent::TrackChanged { previous_id, track });
        }
        changed
    }

    fn publish_cached(&self, track: NowPlayingTrack) {
        self.live_tx.send_if_modified(|state| {
            let modified = state.stale || state.track.as_ref() != Some(&track);
            if modified {
                state.track = Some(track);
                state.stale = false;
                state.last_error = None;
            }
            modified
        });
    }

    /// Drop the cached track and forget the last id, then poll right away.
    pub async fn refresh_now_playing(&self) -> PollOutcome {
        self.reset_now_playing();
        self.poll_once().await
    }

    fn reset_now_playing(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.invalidate(NOW_PLAYING_KEY);
        *self.last_track_id.lock() = None;
    }

    pub fn now_playing(&self) -> Option<NowPlayingTrack> {
        self.live_tx.borrow().track.clone()
    }

    pub fn live_state(&self) -> LiveState {
        self.live_tx.borrow().clone()
    }

    /// Receiver notified whenever the published live state changes.
    pub fn subscribe(&self) -> watch::Receiver<LiveState> {
        self.live_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    // =========================================================================
    // Schedule
    // =========================================================================

    /// Today's schedule. Served from the cache unless `force` is set or the
    /// entry has expired. Errors are returned to the caller without retry.
    pub async fn fetch_schedule(&self, force: bool) -> Result<ScheduleSnapshot, FetchError> {
        let key = schedule_key(Utc::now().date_naive());

        if !force {
            if let Some(CachedRadio::Schedule(schedule)) = self.cache.get(&key) {
                debug!(key = %key, "Schedule served from cache");
                return Ok(self.publish_schedule(schedule));
            }
        }

        let generation = self.schedule_generation.load(Ordering::SeqCst);
        let schedule = {
            let _loading = LoadingGuard::enter(&self.schedule_loading);
            match time::timeout(self.settings.request_timeout, self.source.daily_schedule()).await {
                Ok(Ok(schedule)) => schedule,
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed to fetch schedule");
                    return Err(e);
                }
                Err(_) => {
                    warn!("Schedule fetch timed out");
                    return Err(FetchError::Timeout);
                }
            }
        };

        if self.schedule_generation.load(Ordering::SeqCst) != generation {
            SyncCounters::bump(&self.counters.discarded);
            debug!(key = %key, "Discarding schedule fetched before the cache was reset");
            return Err(FetchError::Cancelled);
        }

        self.cache.set_with_ttl(
            key,
            CachedRadio::Schedule(schedule.clone()),
            self.settings.schedule_ttl,
        );
        let _ = self.events_tx.send(SyncEvent::ScheduleUpdated {
            date: schedule.date.clone(),
        });
        Ok(self.publish_schedule(schedule))
    }

    /// Publish with the current-track pointers taken from the latest
    /// now-playing value.
    fn publish_schedule(&self, mut schedule: ScheduleSnapshot) -> ScheduleSnapshot {
        let current = self.now_playing();
        if let Some(track) = &current {
            schedule.apply_now_playing(track);
        }
        self.schedule_tx.send_replace(Some(schedule.clone()));
        schedule
    }

    pub fn schedule(&self) -> Option<ScheduleSnapshot> {
        self.schedule_tx.borrow().clone()
    }

    pub fn subscribe_schedule(&self) -> watch::Receiver<Option<ScheduleSnapshot>> {
        self.schedule_tx.subscribe()
    }

    pub fn schedule_loading(&self) -> bool {
        self.schedule_loading.load(Ordering::SeqCst) > 0
    }

    /// Drop every cached schedule, e.g. when the day rolls over.
    pub fn invalidate_schedule(&self) -> usize {
        self.schedule_generation.fetch_add(1, Ordering::SeqCst);
        self.cache.invalidate(SCHEDULE_KEY_PATTERN)
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    /// Empty the cache and forget the last observed track.
    pub fn clear_cache(&self) {
        self.reset_now_playing();
        self.schedule_generation.fetch_add(1, Ordering::SeqCst);
        self.cache.clear();
    }

    pub fn cache(&self) -> &Arc<RadioCache> {
        &self.cache
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn stats(&self) -> SyncStats {
        self.counters.snapshot()
    }
}

impl Drop for RadioSync {
    fn drop(&mut self) {
        if let Some(poll_loop) = self.poll_loop.get_mut().take() {
            let _ = poll_loop.shutdown.send(true);
        }
    }
}
