use crate::playlist::{Key, KeyMethod, MediaPlaylist, Segment};
use reqwest::Url;

/// A parsed `.m3u8` document, before master playlists are resolved down to
/// a single media playlist.
pub enum ParsedPlaylist {
    /// Variant stream uris, in the order they were listed.
    Master(Vec<String>),
    Media(MediaPlaylist),
}

/// Parses m3u8 text. `uri` becomes the base for relative resolution when the
/// document is a media playlist.
pub fn parse(text: &str, uri: &Url) -> Result<ParsedPlaylist, String> {
    if !text.contains("#EXTM3U") {
        return Err("document is missing the #EXTM3U tag".to_owned());
    }

    match m3u8_rs::parse_playlist_res(text.as_bytes()) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => Ok(ParsedPlaylist::Master(
            master.variants.iter().map(|x| x.uri.to_owned()).collect(),
        )),
        Ok(m3u8_rs::Playlist::MediaPlaylist(media)) => Ok(ParsedPlaylist::Media(MediaPlaylist {
            uri: uri.to_owned(),
            segments: map_segments(&media),
        })),
        Err(_) => Err("document could not be parsed as an hls playlist".to_owned()),
    }
}

/// m3u8-rs attaches `#EXT-X-KEY` only to the segment it precedes, but the
/// tag applies to every following segment until the next one, so the active
/// key is carried forward across the loop.
fn map_segments(media: &m3u8_rs::MediaPlaylist) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(media.segments.len());
    let mut active_key: Option<Key> = None;

    for (index, segment) in media.segments.iter().enumerate() {
        if let Some(key) = &segment.key {
            active_key = Some(map_key(key));
        }

        segments.push(Segment {
            index,
            uri: segment.uri.to_owned(),
            duration: segment.duration,
            key: active_key.clone(),
        });
    }

    segments
}

fn map_key(key: &m3u8_rs::Key) -> Key {
    Key {
        method: match &key.method {
            m3u8_rs::KeyMethod::AES128 => KeyMethod::Aes128,
            m3u8_rs::KeyMethod::None => KeyMethod::None,
            m3u8_rs::KeyMethod::SampleAES => KeyMethod::Other("SAMPLE-AES".to_owned()),
            m3u8_rs::KeyMethod::Other(x) => KeyMethod::Other(x.to_owned()),
        },
        uri: key.uri.clone(),
        iv: key.iv.clone(),
    }
}
