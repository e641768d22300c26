//! Agam Vani - terminal listener for the devotional radio stream.
//!
//! With no arguments, follows the live stream and prints each track as it
//! comes on air until Ctrl+C. `--schedule` prints today's programme instead.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agamvani_core::api::ApiClient;
use agamvani_core::cache::ImageCache;
use agamvani_core::config::Config;
use agamvani_core::models::{NowPlayingTrack, ScheduleSnapshot};
use agamvani_core::sync::{RadioCache, RadioSync, SyncEvent};
use agamvani_core::utils::{format_duration, truncate_string};

// ============================================================================
// Constants
// ============================================================================

/// Log file prefix; the appender adds the date
const LOG_FILE_PREFIX: &str = "agamvani.log";

/// Title column width in the schedule listing
const TITLE_WIDTH: usize = 48;

const USAGE: &str = "\
Usage: agamvani [--schedule [--force]]

  (no options)   follow the live stream until Ctrl+C
  --schedule     print today's schedule
  --force        bypass the cache when fetching the schedule
  -h, --help     show this message

Set RUST_LOG (e.g. RUST_LOG=debug) to change the log level.";

/// Initialize the tracing subscriber: stderr plus a daily rolling file.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{}", USAGE);
        return Ok(());
    }
    if let Some(unknown) = args
        .iter()
        .find(|a| !matches!(a.as_str(), "--schedule" | "--force"))
    {
        anyhow::bail!("Unknown argument: {}\n\n{}", unknown, USAGE);
    }
    let show_schedule = args.iter().any(|a| a == "--schedule");
    let force = args.iter().any(|a| a == "--force");

    let log_dir = Config::log_dir().ok();
    let _log_guard = init_tracing(log_dir.as_deref());

    let config = Config::load()?;
    info!(api = %config.api_base_url, "Agam Vani starting");

    let api = Arc::new(ApiClient::new(&config.api_base_url, config.request_timeout())?);
    let cache = Arc::new(RadioCache::with_capacity(config.cache_capacity));
    let sync = Arc::new(RadioSync::new(api.clone(), cache, config.sync_settings()));

    let result = if show_schedule {
        print_schedule(&sync, force).await
    } else {
        let images = ImageCache::new(api);
        listen(&sync, &images).await
    };

    info!("Agam Vani shutting down");
    result
}

// ============================================================================
// Live mode
// ============================================================================

async fn listen(sync: &Arc<RadioSync>, images: &ImageCache) -> Result<()> {
    let mut events = sync.events();
    sync.start();

    // The schedule is only needed to find the upcoming track for preloading
    if let Err(e) = sync.fetch_schedule(false).await {
        warn!(error = %e, "Schedule unavailable; artwork preloading disabled");
    }

    println!(
        "Listening, polling every {}s (Ctrl+C to quit)",
        sync.settings().poll_interval.as_secs()
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut live = sync.subscribe();
    let mut connection = ConnectionStatus::default();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = live.changed() => {
                if changed.is_err() {
                    break;
                }
                let (stale, error) = {
                    let state = live.borrow_and_update();
                    (state.stale, state.last_error.clone())
                };
                match connection.observe(stale) {
                    Some(Transition::Lost) => {
                        let reason = error.map(|e| e.to_string()).unwrap_or_default();
                        println!("{}  (connection lost: {})", Local::now().format("%H:%M:%S"), reason);
                    }
                    Some(Transition::Restored) => {
                        println!("{}  (connection restored)", Local::now().format("%H:%M:%S"));
                    }
                    None => {}
                }
            }
            event = events.recv() => match event {
                Ok(SyncEvent::TrackChanged { track, .. }) => {
                    print_track(&track);
                    refresh_artwork(sync, images, &track).await;
                }
                Ok(SyncEvent::ScheduleUpdated { date }) => {
                    debug!(date = %date, "Schedule updated");
                }
                Ok(SyncEvent::PollFailed(e)) => {
                    debug!(error = %e, "Poll failed");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event receiver lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    sync.stop();
    print_stats(sync, images);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Lost,
    Restored,
}

/// Tracks whether the stream is reachable so only changes get printed,
/// not every failed tick.
#[derive(Debug, Default)]
struct ConnectionStatus {
    offline: bool,
}

impl ConnectionStatus {
    fn observe(&mut self, stale: bool) -> Option<Transition> {
        if stale == self.offline {
            return None;
        }
        self.offline = stale;
        Some(if stale { Transition::Lost } else { Transition::Restored })
    }
}

fn print_track(track: &NowPlayingTrack) {
    let kind = if track.is_original() { "" } else { "  *" };
    println!(
        "{}  {}  [{}]{}",
        Local::now().format("%H:%M:%S"),
        track.display_title(),
        track.formatted_duration(),
        kind
    );
}

/// Load artwork for the track on air, preload the next one, and release
/// everything else.
async fn refresh_artwork(sync: &RadioSync, images: &ImageCache, track: &NowPlayingTrack) {
    let current_code = track.artwork_code();
    let mut keep = vec![current_code.clone()];

    if let Some(thumbnail) = &track.thumbnail {
        match images.fetch_image(thumbnail, &current_code).await {
            Ok(handle) => debug!(code = %current_code, size = handle.len(), "Artwork ready"),
            Err(e) => debug!(code = %current_code, error = %e, "Artwork unavailable"),
        }
    }

    let schedule = sync.schedule();
    if let Some(next) = schedule.as_ref().and_then(|s| s.next_track(track)) {
        if let Some(thumbnail) = &next.thumbnail {
            images.preload_next(&next.code, thumbnail);
            keep.push(next.code.clone());
        }
    }

    let released = images.cleanup(&keep);
    if released > 0 {
        debug!(released, "Released old artwork");
    }
}

fn print_stats(sync: &RadioSync, images: &ImageCache) {
    let stats = sync.stats();
    let cache = sync.cache().stats();
    let artwork = images.stats();

    println!();
    println!(
        "Polls: {} ({} from cache, {} network, {} failed)",
        stats.polls, stats.cache_hits, stats.network_fetches, stats.failures
    );
    println!("Track changes: {}", stats.track_changes);
    println!("Cache: {}/{} entries [{}]", cache.size, cache.max_size, cache.keys.join(", "));
    println!(
        "Artwork: {} images, {} KiB",
        artwork.cached_images,
        artwork.cached_bytes / 1024
    );
}

// ============================================================================
// Schedule mode
// ============================================================================

async fn print_schedule(sync: &RadioSync, force: bool) -> Result<()> {
    // Pointers come from the live poll, so fetch now playing first
    sync.poll_once().await;
    let schedule = sync.fetch_schedule(force).await?;
    let current = sync.now_playing();

    print!("{}", render_schedule(&schedule, current.as_ref()));
    Ok(())
}

fn render_schedule(schedule: &ScheduleSnapshot, current: Option<&NowPlayingTrack>) -> String {
    let position = current.and_then(|t| schedule.current_position(t));
    let mut out = format!("Schedule for {} ({} tracks)\n", schedule.date, schedule.track_count());

    for (si, slot) in schedule.slots.iter().enumerate() {
        let marker = if schedule.is_current_slot(slot) { " (on air)" } else { "" };
        out.push_str(&format!(
            "\n{} [{}]{}\n",
            slot.slot_label,
            format_duration(slot.total_duration),
            marker
        ));

        for (ti, track) in slot.tracks.iter().enumerate() {
            let pointer = if position == Some((si, ti)) { ">" } else { " " };
            out.push_str(&format!(
                " {} {:>3}  {:<8} {:<width$} {:>8}\n",
                pointer,
                track.sequence_number,
                track.code,
                truncate_string(&track.title, TITLE_WIDTH),
                format_duration(track.duration),
                width = TITLE_WIDTH
            ));
        }
    }
    out
}
