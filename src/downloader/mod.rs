mod encryption;
mod fetch;
mod keys;
mod stream;

pub use encryption::Decrypter;
pub use fetch::fetch_playlist;
pub use keys::{CachedKey, KeyCache};
pub use stream::{download_segments, MAX_THREADS, SEGMENT_ATTEMPTS};

use crate::{error::PipelineResult, merger, progress::Progress, utils};
use log::{info, warn};
use reqwest::{Client, Url};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::fs;

/// Run-scoped state shared with every fetcher task.
///
/// One instance per pipeline run, never process-wide; batch callers running
/// several pipelines keep their flags and working directories apart. The
/// cancellation flag is one-way: once raised it stays raised for the rest
/// of the run.
pub struct PipelineState {
    cancelled: AtomicBool,
    temp_dir: PathBuf,
}

impl PipelineState {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            temp_dir: temp_dir.into(),
        }
    }

    /// Requests a cooperative stop: no new fetches, no further retries.
    /// In-flight network calls are not aborted, cancellation is best-effort.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Deterministic per-index segment path; reruns find and skip files a
    /// previous run already fetched.
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.temp_dir.join(utils::segment_file_name(index))
    }
}

#[derive(Debug)]
pub struct SegmentResult {
    pub index: usize,
    pub outcome: SegmentOutcome,
    /// Fetch attempts consumed; 0 when the segment was already on disk.
    pub attempts: u8,
}

#[derive(Debug)]
pub enum SegmentOutcome {
    Success { path: PathBuf },
    Failed { reason: String },
}

impl SegmentResult {
    fn cancelled(index: usize) -> Self {
        Self {
            index,
            outcome: SegmentOutcome::Failed {
                reason: "cancelled".to_owned(),
            },
            attempts: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SegmentOutcome::Success { .. })
    }
}

/// What a finished run looked like. `success` is true iff zero segments
/// failed; `output` is only set when reassembly actually produced the file.
#[derive(Debug)]
pub struct RunSummary {
    pub success: bool,
    pub results: Vec<SegmentResult>,
    pub output: Option<PathBuf>,
}

pub struct DownloadOptions {
    pub output: PathBuf,
    pub threads: usize,
    pub keep_temp: bool,
}

/// Executes a full pipeline run: resolve playlist, fetch and decrypt all
/// segments under the concurrency bound, reassemble into `options.output`.
///
/// Playlist and reassembly errors are fatal and returned as `Err`. Segment
/// failures are isolated: the run completes, reports `success: false` and
/// keeps the temporary directory so a rerun can resume from the segments
/// that did land.
pub async fn run(
    client: &Client,
    url: Url,
    state: Arc<PipelineState>,
    options: &DownloadOptions,
    progress: Arc<Progress>,
) -> PipelineResult<RunSummary> {
    progress.log(&format!("fetching playlist {url}"));
    let playlist = fetch_playlist(client, url).await?;

    let total = playlist.segments.len();
    progress.set_total(total);
    info!("{} segments to download", total);

    if playlist.is_encrypted() {
        info!("encrypted content detected, segments will be decrypted");
    }

    fs::create_dir_all(state.temp_dir()).await?;

    let keys = Arc::new(KeyCache::new(client.clone(), playlist.uri.clone()));
    let results =
        download_segments(client, &playlist, &state, &keys, options.threads, &progress).await;

    let failed = results.iter().filter(|x| !x.is_success()).count();

    if failed > 0 {
        warn!(
            "{} of {} segments failed, keeping {} for resume",
            failed,
            total,
            state.temp_dir().display()
        );
        return Ok(RunSummary {
            success: false,
            results,
            output: None,
        });
    }

    merger::reassemble(state.temp_dir(), total, &options.output, &progress)?;

    if options.keep_temp {
        info!("keeping segment files in {}", state.temp_dir().display());
    } else {
        fs::remove_dir_all(state.temp_dir()).await?;
    }

    Ok(RunSummary {
        success: true,
        results,
        output: Some(options.output.clone()),
    })
}
