use std::{env, path::Path};

/// On-disk name for one fetched segment; zero-padded so lexicographic and
/// index order agree.
pub fn segment_file_name(index: usize) -> String {
    format!("segment_{index:05}.ts")
}

/// Derives a filesystem-safe output name from the playlist url path stem.
///
/// Deterministic on purpose: reruns of the same url reuse the same working
/// directory and can skip segments that already landed.
pub fn filename_from_url(url: &reqwest::Url) -> String {
    let stem = url
        .path_segments()
        .and_then(|mut x| x.next_back())
        .unwrap_or("");

    let stem = stem
        .strip_suffix(".m3u8")
        .or(stem.strip_suffix(".m3u"))
        .unwrap_or(stem);

    let sanitized = stem
        .chars()
        .map(|x| match x {
            '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>' | '.' | ';' | '=' | ' ' => {
                '_'
            }
            _ => x,
        })
        .collect::<String>();

    if sanitized.is_empty() {
        "video".to_owned()
    } else {
        sanitized
    }
}

pub fn find_ffmpeg() -> Option<String> {
    let bin = if cfg!(target_os = "windows") {
        "ffmpeg.exe"
    } else {
        "ffmpeg"
    };

    if Path::new(bin).exists() {
        return Some(bin.to_owned());
    }

    let separator = if cfg!(target_os = "windows") { ';' } else { ':' };

    env::var("PATH").ok()?.split(separator).find_map(|dir| {
        let path = Path::new(dir).join(bin);
        path.exists().then(|| path.to_string_lossy().into_owned())
    })
}
