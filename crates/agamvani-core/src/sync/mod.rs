//! Live radio synchronization.
//!
//! `RadioSync` polls the now-playing endpoint on a fixed interval, writes
//! the shared cache, detects track changes, and publishes the result to any
//! number of subscribers. It also serves today's schedule, cached for a few
//! minutes and patched with the current-track pointers as they move.

pub mod radio;
pub mod state;

pub use radio::{schedule_key, RadioCache, RadioSync, NOW_PLAYING_KEY, SCHEDULE_KEY_PATTERN};
pub use state::{CachedRadio, LiveState, PollOutcome, SyncEvent, SyncSettings, SyncStats};
