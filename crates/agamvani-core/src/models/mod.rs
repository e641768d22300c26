//! Wire models for the radio API.
//!
//! - `NowPlayingTrack`: the track on air, polled every few seconds
//! - `ScheduleSnapshot`: one day of programming, grouped into time slots
//!
//! With the `ts` feature enabled these derive TypeScript bindings for the
//! web shell.

pub mod schedule;
pub mod track;

pub use schedule::{ScheduleSlot, ScheduleSnapshot, ScheduledTrack};
pub use track::{NowPlayingResponse, NowPlayingTrack, ORIGINAL_CATEGORY};
