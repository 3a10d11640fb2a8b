use thiserror::Error;

/// Errors surfaced by the download pipeline.
///
/// Playlist and reassembly errors are fatal to a run. Key errors are not,
/// the affected segments are kept undecrypted. Per-segment fetch failures
/// never escape the fetcher, they are aggregated as [`SegmentResult`]s; the
/// `SegmentFetch` variant only exists so callers driving a single segment
/// get the same context (index, uri, cause).
///
/// [`SegmentResult`]: crate::downloader::SegmentResult
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to fetch playlist {url}: {reason}")]
    PlaylistFetch { url: String, reason: String },

    #[error("failed to parse playlist {url}: {reason}")]
    PlaylistParse { url: String, reason: String },

    #[error("failed to fetch decryption key {uri}: {reason}")]
    KeyFetch { uri: String, reason: String },

    #[error("segment {index} ({uri}) failed after {attempts} attempts: {reason}")]
    SegmentFetch {
        index: usize,
        uri: String,
        attempts: u8,
        reason: String,
    },

    #[error("reassembly failed: {0}")]
    Reassembly(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
