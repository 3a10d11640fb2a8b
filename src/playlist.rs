use reqwest::Url;

/// A resolved media playlist.
///
/// Master playlists never appear here; the resolver collapses them to a
/// single variant before handing the playlist to the rest of the pipeline.
/// `uri` is the final (post-redirect) playlist url and serves as the base
/// for resolving relative segment and key uris.
#[derive(Debug)]
pub struct MediaPlaylist {
    pub uri: Url,
    pub segments: Vec<Segment>,
}

impl MediaPlaylist {
    /// Resolves a possibly relative uri against the playlist base.
    pub fn join(&self, uri: &str) -> Result<Url, url::ParseError> {
        self.uri.join(uri)
    }

    pub fn is_encrypted(&self) -> bool {
        self.segments
            .iter()
            .any(|x| matches!(&x.key, Some(key) if key.method != KeyMethod::None))
    }
}

/// One chunk of the media stream. `index` is 0-based playlist order and
/// defines both the on-disk name and the final reassembly order.
#[derive(Clone, Debug)]
pub struct Segment {
    pub index: usize,
    pub uri: String,
    pub duration: f32,
    pub key: Option<Key>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum KeyMethod {
    Aes128,
    None,
    Other(String),
}

#[derive(Clone, Debug)]
pub struct Key {
    pub method: KeyMethod,
    pub uri: Option<String>,
    /// Hex string as written in the playlist, with or without a `0x` prefix.
    pub iv: Option<String>,
}

impl Key {
    /// Decodes the explicit iv, when present, into 16 bytes.
    ///
    /// Returns `Ok(None)` when the playlist did not carry one; derivation
    /// from the segment index is the decrypter's concern.
    pub fn iv_bytes(&self) -> Result<Option<[u8; 16]>, String> {
        let Some(iv) = &self.iv else {
            return Ok(None);
        };

        let stripped = iv
            .strip_prefix("0x")
            .or(iv.strip_prefix("0X"))
            .unwrap_or(iv);
        let bytes =
            hex::decode(stripped).map_err(|e| format!("invalid iv hex string {iv:?}: {e}"))?;

        match <[u8; 16]>::try_from(bytes.as_slice()) {
            Ok(iv) => Ok(Some(iv)),
            Err(_) => Err(format!("iv {iv:?} is {} bytes, expected 16", bytes.len())),
        }
    }
}
