use crate::{
    downloader::{
        encryption::Decrypter, keys::KeyCache, PipelineState, SegmentOutcome, SegmentResult,
    },
    playlist::{Key, KeyMethod, MediaPlaylist},
    progress::Progress,
};
use log::{debug, warn};
use reqwest::{Client, Url};
use std::{path::PathBuf, sync::Arc};
use tokio::{fs, io::AsyncWriteExt, task::JoinSet};

/// Attempts per segment, counting the first one.
pub const SEGMENT_ATTEMPTS: u8 = 3;

/// Upper bound on concurrent segment fetches.
pub const MAX_THREADS: usize = 50;

/// Runs one fetcher task per segment with at most `threads` in flight.
///
/// Completion order is unconstrained; the returned results are sorted back
/// into playlist order. Once the cancellation flag is observed no further
/// tasks are dispatched, but tasks already in flight are left to finish or
/// self-abort at their own flag checks.
pub async fn download_segments(
    client: &Client,
    playlist: &MediaPlaylist,
    state: &Arc<PipelineState>,
    keys: &Arc<KeyCache>,
    threads: usize,
    progress: &Arc<Progress>,
) -> Vec<SegmentResult> {
    let threads = threads.clamp(1, MAX_THREADS);
    let mut results = Vec::with_capacity(playlist.segments.len());
    let mut set: JoinSet<SegmentResult> = JoinSet::new();

    for segment in &playlist.segments {
        while set.len() >= threads && !state.is_cancelled() {
            if let Some(Ok(result)) = set.join_next().await {
                results.push(result);
            }
        }

        // Checked after waiting for a slot, so a flag raised by an in-flight
        // task is seen before the next dispatch.
        if state.is_cancelled() {
            results.push(SegmentResult::cancelled(segment.index));
            continue;
        }

        let url = match playlist.join(&segment.uri) {
            Ok(url) => url,
            Err(e) => {
                results.push(SegmentResult {
                    index: segment.index,
                    outcome: SegmentOutcome::Failed {
                        reason: format!("invalid segment uri {:?}: {}", segment.uri, e),
                    },
                    attempts: 0,
                });
                continue;
            }
        };

        let task = SegmentTask {
            client: client.clone(),
            index: segment.index,
            key: segment.key.clone(),
            keys: keys.clone(),
            path: state.segment_path(segment.index),
            progress: progress.clone(),
            state: state.clone(),
            url,
        };
        set.spawn(task.execute());
    }

    while let Some(joined) = set.join_next().await {
        if let Ok(result) = joined {
            results.push(result);
        }
    }

    results.sort_by_key(|x| x.index);
    results
}

struct SegmentTask {
    client: Client,
    index: usize,
    key: Option<Key>,
    keys: Arc<KeyCache>,
    path: PathBuf,
    progress: Arc<Progress>,
    state: Arc<PipelineState>,
    url: Url,
}

impl SegmentTask {
    async fn execute(self) -> SegmentResult {
        // Deterministic per-index naming makes reruns resumable: an existing
        // file is trusted as-is, its content is not revalidated.
        if self.path.exists() {
            debug!("segment {} already present, skipping", self.index);
            self.progress
                .tick(&format!("segment {} already present", self.index));
            return SegmentResult {
                index: self.index,
                outcome: SegmentOutcome::Success { path: self.path },
                attempts: 0,
            };
        }

        for attempt in 1..=SEGMENT_ATTEMPTS {
            if self.state.is_cancelled() {
                return SegmentResult::cancelled(self.index);
            }

            let reason = match self.attempt().await {
                Ok(data) => {
                    let data = self.decrypt(data).await;

                    if let Err(e) = self.persist(&data).await {
                        return SegmentResult {
                            index: self.index,
                            outcome: SegmentOutcome::Failed {
                                reason: format!("could not write {}: {}", self.path.display(), e),
                            },
                            attempts: attempt,
                        };
                    }

                    self.progress
                        .tick(&format!("segment {} downloaded", self.index));
                    return SegmentResult {
                        index: self.index,
                        outcome: SegmentOutcome::Success { path: self.path },
                        attempts: attempt,
                    };
                }
                Err(reason) => reason,
            };

            if attempt == SEGMENT_ATTEMPTS {
                warn!(
                    "segment {} ({}) failed after {} attempts: {}",
                    self.index, self.url, attempt, reason
                );
                return SegmentResult {
                    index: self.index,
                    outcome: SegmentOutcome::Failed { reason },
                    attempts: attempt,
                };
            }

            debug!(
                "segment {} attempt {}/{} failed: {}",
                self.index, attempt, SEGMENT_ATTEMPTS, reason
            );
        }

        unreachable!("retry loop always returns on the final attempt");
    }

    async fn attempt(&self) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .and_then(|x| x.error_for_status())
            .map_err(|e| e.to_string())?;

        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(bytes.to_vec())
    }

    /// Decryption never fails the segment: key-cache errors, unsupported
    /// methods and malformed key material all degrade to persisting the
    /// bytes as fetched.
    async fn decrypt(&self, data: Vec<u8>) -> Vec<u8> {
        let Some(key) = &self.key else {
            return data;
        };

        if let KeyMethod::Other(method) = &key.method {
            warn!(
                "segment {} uses unsupported encryption {}, writing it undecrypted",
                self.index, method
            );
            return data;
        }

        match self.keys.resolve(key).await {
            Ok(Some(cached)) => match Decrypter::new(&cached.bytes, cached.iv) {
                Some(decrypter) => decrypter.decrypt(data, self.index as u64),
                None => {
                    warn!(
                        "segment {}: key is {} bytes, expected 16, writing it undecrypted",
                        self.index,
                        cached.bytes.len()
                    );
                    data
                }
            },
            Ok(None) => data,
            Err(e) => {
                warn!("{}, writing segment {} undecrypted", e, self.index);
                data
            }
        }
    }

    async fn persist(&self, data: &[u8]) -> std::io::Result<()> {
        let part = self.path.with_extension("ts.part");
        let mut file = fs::File::create(&part).await?;
        file.write_all(data).await?;
        file.flush().await?;
        fs::rename(&part, &self.path).await
    }
}
