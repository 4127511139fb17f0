// Scrobble delivery queue
// Durable FIFO of pending scrobbles with per-item exponential backoff

use crate::persist;
use crate::scrobbler::{ApiError, LastFmClient, TrackInfo};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const QUEUE_FILE_NAME: &str = "lastfm_scrobble_queue.json";
const QUEUE_FILE_VERSION: u32 = 1;

/// A scrobble waiting for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedSubmission {
    #[serde(flatten)]
    pub track: TrackInfo,
    #[serde(default)]
    pub retry_count: u32,
    /// Epoch seconds of the last failed attempt, 0 if never attempted
    #[serde(default)]
    pub last_attempt: i64,
}

impl QueuedSubmission {
    pub fn new(track: TrackInfo) -> Self {
        Self {
            track,
            retry_count: 0,
            last_attempt: 0,
        }
    }
}

#[derive(Serialize)]
struct QueueFile<'a> {
    version: u32,
    queue: &'a [QueuedSubmission],
}

/// Entries stay raw so one bad entry does not take the rest down with it
#[derive(Deserialize)]
struct RawQueueFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    queue: Vec<serde_json::Value>,
}

/// Tuning for drain cycles and abandonment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Maximum delivery attempts per drain
    pub batch_size: usize,
    pub base_backoff_secs: i64,
    /// Backoff stops growing after this many failures
    pub max_backoff_exponent: u32,
    /// Drop a submission once it has failed this many times
    pub max_retries: Option<u32>,
    /// Drop a submission whose play is older than this many seconds
    pub max_age_secs: Option<i64>,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            batch_size: 10,
            base_backoff_secs: 30,
            max_backoff_exponent: 5,
            max_retries: None,
            max_age_secs: None,
        }
    }
}

impl QueuePolicy {
    /// Minimum gap between attempts after `retry_count` failures
    pub fn backoff_secs(&self, retry_count: u32) -> i64 {
        let exponent = retry_count.min(self.max_backoff_exponent).min(32);
        self.base_backoff_secs.saturating_mul(1i64 << exponent)
    }

    pub fn is_eligible(&self, item: &QueuedSubmission, now: i64) -> bool {
        now.saturating_sub(item.last_attempt) >= self.backoff_secs(item.retry_count)
    }

    fn is_expired(&self, item: &QueuedSubmission, now: i64) -> bool {
        self.max_age_secs
            .is_some_and(|max_age| now.saturating_sub(item.track.timestamp) > max_age)
    }

    fn is_exhausted(&self, item: &QueuedSubmission) -> bool {
        self.max_retries
            .is_some_and(|max_retries| item.retry_count >= max_retries)
    }
}

/// Why a drain cycle did not attempt anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainSkip {
    NotAuthenticated,
    Empty,
    Offline,
}

/// Outcome of one drain cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub skipped: Option<DrainSkip>,
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub remaining: usize,
}

impl DrainReport {
    fn skipped(reason: DrainSkip, remaining: usize) -> Self {
        Self {
            skipped: Some(reason),
            remaining,
            ..Self::default()
        }
    }
}

struct QueueState {
    items: Vec<QueuedSubmission>,
    network_was_unavailable: bool,
}

/// Pending scrobbles, persisted to disk after every mutation.
///
/// A single lock covers the in-memory sequence and the file for the whole of
/// `enqueue`, `drain` and `clear`.
pub struct DeliveryQueue {
    path: PathBuf,
    policy: QueuePolicy,
    state: Mutex<QueueState>,
}

impl DeliveryQueue {
    /// Open the queue file, starting empty if it is missing or unreadable
    pub fn load(path: impl Into<PathBuf>, policy: QueuePolicy) -> Self {
        let path = path.into();
        let items = read_queue_file(&path);
        log::info!("Queue initialized, {} tracks loaded", items.len());

        Self {
            path,
            policy,
            state: Mutex::new(QueueState {
                items,
                network_was_unavailable: false,
            }),
        }
    }

    pub fn in_dir(data_dir: &Path, policy: QueuePolicy) -> Self {
        Self::load(data_dir.join(QUEUE_FILE_NAME), policy)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a scrobble and write the queue to disk before returning
    pub fn enqueue(&self, track: TrackInfo) {
        let mut state = self.lock();
        log::debug!("Track added to queue: {}", track);
        state.items.push(QueuedSubmission::new(track));
        self.persist(&state.items);
        log::info!("Track queued for scrobbling ({} total)", state.items.len());
    }

    pub fn size(&self) -> usize {
        self.lock().items.len()
    }

    pub fn snapshot(&self) -> Vec<QueuedSubmission> {
        self.lock().items.clone()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.items.clear();
        self.persist(&state.items);
        log::info!("Scrobble queue cleared");
    }

    /// Run one delivery cycle against the current clock
    pub fn drain(&self, client: &LastFmClient) -> DrainReport {
        self.drain_at(client, chrono::Utc::now().timestamp())
    }

    /// Run one delivery cycle as of `now` (epoch seconds).
    ///
    /// Up to `batch_size` eligible items are attempted in queue order. Items
    /// still backing off and everything past the cap are carried over as-is.
    pub fn drain_at(&self, client: &LastFmClient, now: i64) -> DrainReport {
        if !client.is_authenticated() {
            return DrainReport::skipped(DrainSkip::NotAuthenticated, self.size());
        }

        let queued = self.size();
        if queued == 0 {
            return DrainReport::skipped(DrainSkip::Empty, 0);
        }

        let online = client.is_reachable();
        self.note_network(online);
        if !online {
            return DrainReport::skipped(DrainSkip::Offline, queued);
        }

        let mut state = self.lock();
        log::debug!("Processing queue with {} tracks", state.items.len());

        let mut report = DrainReport::default();
        let mut remaining = Vec::with_capacity(state.items.len());
        let mut pending = std::mem::take(&mut state.items).into_iter();
        let mut went_offline = false;

        while let Some(mut item) = pending.next() {
            if report.attempted >= self.policy.batch_size {
                log::debug!(
                    "Processed {} tracks this cycle, will continue later",
                    report.attempted
                );
                remaining.push(item);
                remaining.extend(pending.by_ref());
                break;
            }

            if self.policy.is_expired(&item, now) {
                log::warn!("Abandoning scrobble older than the age limit: {}", item.track);
                report.abandoned += 1;
                continue;
            }

            if !self.policy.is_eligible(&item, now) {
                remaining.push(item);
                continue;
            }

            report.attempted += 1;
            match client.scrobble(&item.track) {
                Ok(()) => {
                    log::info!("Scrobbled successfully: {}", item.track);
                    report.delivered += 1;
                }
                Err(e) if e.is_offline() => {
                    log::warn!("Connection lost while scrobbling {}: {}", item.track, e);
                    report.attempted -= 1;
                    went_offline = true;
                    remaining.push(item);
                    remaining.extend(pending.by_ref());
                    break;
                }
                Err(e @ (ApiError::NotAuthenticated | ApiError::MissingCredentials)) => {
                    log::warn!("Stopping queue processing: {}", e);
                    report.attempted -= 1;
                    remaining.push(item);
                    remaining.extend(pending.by_ref());
                    break;
                }
                Err(e) => {
                    item.retry_count += 1;
                    item.last_attempt = now;
                    report.failed += 1;
                    log::warn!(
                        "Failed to scrobble {} (attempt {}): {}",
                        item.track,
                        item.retry_count,
                        e
                    );

                    if self.policy.is_exhausted(&item) {
                        log::warn!(
                            "Abandoning scrobble after {} attempts: {}",
                            item.retry_count,
                            item.track
                        );
                        report.abandoned += 1;
                    } else {
                        remaining.push(item);
                    }

                    if e.is_session_rejection() {
                        remaining.extend(pending.by_ref());
                        break;
                    }
                }
            }
        }

        state.items = remaining;
        self.persist(&state.items);
        report.remaining = state.items.len();
        drop(state);

        if went_offline {
            self.note_network(false);
        }

        report
    }

    /// Log connectivity transitions once rather than every cycle.
    /// Returns true when this call was a transition.
    fn note_network(&self, online: bool) -> bool {
        let mut state = self.lock();
        if online == !state.network_was_unavailable {
            return false;
        }

        state.network_was_unavailable = !online;
        if online {
            log::info!(
                "Network connection restored, resuming queued scrobbles ({} tracks pending)",
                state.items.len()
            );
        } else {
            log::warn!(
                "Network unavailable, scrobbling paused ({} tracks stored offline)",
                state.items.len()
            );
        }
        true
    }

    fn persist(&self, items: &[QueuedSubmission]) {
        if let Err(e) = write_queue_file(&self.path, items) {
            log::error!("Failed to save queue to {:?}: {}", self.path, e);
        }
    }
}

fn read_queue_file(path: &Path) -> Vec<QueuedSubmission> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("Queue file does not exist (first run or empty queue)");
            return Vec::new();
        }
        Err(e) => {
            log::error!("Failed to read queue file {:?}: {}", path, e);
            return Vec::new();
        }
    };

    let file = match serde_json::from_str::<RawQueueFile>(&content) {
        Ok(file) => file,
        Err(e) => {
            log::error!("Failed to load queue from {:?}: {}", path, e);
            set_aside(path);
            return Vec::new();
        }
    };

    if file.version != QUEUE_FILE_VERSION {
        log::warn!(
            "Queue file version {} differs from {}, loading anyway",
            file.version,
            QUEUE_FILE_VERSION
        );
    }

    file.queue
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            serde_json::from_value::<QueuedSubmission>(entry)
                .inspect_err(|e| log::warn!("Dropping unreadable queue entry {}: {}", index, e))
                .ok()
        })
        .collect()
}

/// Keep an unreadable queue file next to the real one instead of overwriting it
fn set_aside(path: &Path) {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".corrupt");
    let corrupt_path = path.with_file_name(name);

    match fs::rename(path, &corrupt_path) {
        Ok(()) => log::warn!("Unreadable queue file moved to {:?}", corrupt_path),
        Err(e) => log::error!("Failed to move unreadable queue file {:?}: {}", path, e),
    }
}

fn write_queue_file(path: &Path, items: &[QueuedSubmission]) -> io::Result<()> {
    let file = QueueFile {
        version: QUEUE_FILE_VERSION,
        queue: items,
    };
    let content = serde_json::to_string_pretty(&file)?;
    persist::write_atomic(path, content.as_bytes())
}
