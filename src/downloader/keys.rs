use crate::{
    error::{PipelineError, PipelineResult},
    playlist::{Key, KeyMethod},
};
use log::debug;
use reqwest::{Client, Url};
use std::{collections::HashMap, sync::Mutex};

/// Resolved key material for one `#EXT-X-KEY` uri.
///
/// `bytes` is whatever the key server returned; 16 bytes for a well-formed
/// AES-128 key, but shorter or garbled responses are cached as-is and
/// surface as a decryption fallback downstream rather than being rejected
/// here.
#[derive(Clone)]
pub struct CachedKey {
    pub bytes: Vec<u8>,
    pub iv: Option<[u8; 16]>,
}

/// Per-run decryption key cache.
///
/// Owned by the coordinator for the duration of one run and shared by
/// reference with every fetcher task; hls keys are assumed stable for a VOD
/// asset, so entries are never invalidated. Concurrent first-references to
/// the same uri may both fetch, but the map keeps exactly one value per uri.
pub struct KeyCache {
    base_url: Url,
    client: Client,
    entries: Mutex<HashMap<String, CachedKey>>,
}

impl KeyCache {
    pub fn new(client: Client, base_url: Url) -> Self {
        Self {
            base_url,
            client,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the key material for a segment's key reference.
    ///
    /// `Ok(None)` means no decryption is needed (no key tag, METHOD=NONE, or
    /// an unsupported method the caller warns about separately). Errors are
    /// non-fatal to the segment: it is persisted undecrypted.
    pub async fn resolve(&self, key: &Key) -> PipelineResult<Option<CachedKey>> {
        if key.method != KeyMethod::Aes128 {
            return Ok(None);
        }

        let Some(uri) = &key.uri else {
            return Ok(None);
        };

        if let Some(cached) = self.entries.lock().unwrap().get(uri) {
            return Ok(Some(cached.clone()));
        }

        // Fetch outside the lock; a racing task fetching the same uri is
        // harmless, last insert wins and both see identical material.
        let fetched = self.fetch(key, uri).await?;

        let mut entries = self.entries.lock().unwrap();
        let cached = entries.entry(uri.to_owned()).or_insert(fetched);
        Ok(Some(cached.clone()))
    }

    async fn fetch(&self, key: &Key, uri: &str) -> PipelineResult<CachedKey> {
        let url = self
            .base_url
            .join(uri)
            .map_err(|e| PipelineError::KeyFetch {
                uri: uri.to_owned(),
                reason: e.to_string(),
            })?;

        debug!("fetching decryption key {url}");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|x| x.error_for_status())
            .map_err(|e| PipelineError::KeyFetch {
                uri: uri.to_owned(),
                reason: e.to_string(),
            })?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::KeyFetch {
                uri: uri.to_owned(),
                reason: e.to_string(),
            })?
            .to_vec();

        let iv = key.iv_bytes().map_err(|reason| PipelineError::KeyFetch {
            uri: uri.to_owned(),
            reason,
        })?;

        Ok(CachedKey { bytes, iv })
    }
}
