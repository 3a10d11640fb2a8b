use crate::{
    error::{PipelineError, PipelineResult},
    hls::{self, ParsedPlaylist},
    playlist::MediaPlaylist,
};
use log::info;
use reqwest::{Client, Url};

/// Fetches and parses the playlist at `url`, resolving a master playlist
/// down to its first listed variant.
///
/// The working base uri follows redirects and the master-to-variant jump:
/// relative key and segment uris resolve against the url the media playlist
/// was actually served from. Failures here are fatal to the run; there is
/// no retry at this layer.
pub async fn fetch_playlist(client: &Client, url: Url) -> PipelineResult<MediaPlaylist> {
    let (text, final_url) = fetch_text(client, url).await?;

    match parse(&text, &final_url)? {
        ParsedPlaylist::Media(playlist) => checked(playlist),
        ParsedPlaylist::Master(variants) => {
            let first = variants
                .first()
                .ok_or_else(|| PipelineError::PlaylistParse {
                    url: final_url.to_string(),
                    reason: "master playlist lists no variant streams".to_owned(),
                })?;

            info!(
                "master playlist with {} variants, using the first",
                variants.len()
            );

            let variant_url =
                final_url
                    .join(first)
                    .map_err(|e| PipelineError::PlaylistParse {
                        url: final_url.to_string(),
                        reason: format!("invalid variant uri {first:?}: {e}"),
                    })?;

            let (text, final_url) = fetch_text(client, variant_url).await?;

            match parse(&text, &final_url)? {
                ParsedPlaylist::Media(playlist) => checked(playlist),
                ParsedPlaylist::Master(_) => Err(PipelineError::PlaylistParse {
                    url: final_url.to_string(),
                    reason: "variant resolved to another master playlist".to_owned(),
                }),
            }
        }
    }
}

async fn fetch_text(client: &Client, url: Url) -> PipelineResult<(String, Url)> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .and_then(|x| x.error_for_status())
        .map_err(|e| PipelineError::PlaylistFetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let final_url = response.url().to_owned();
    let text = response
        .text()
        .await
        .map_err(|e| PipelineError::PlaylistFetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    Ok((text, final_url))
}

fn parse(text: &str, url: &Url) -> PipelineResult<ParsedPlaylist> {
    hls::parse(text, url).map_err(|reason| PipelineError::PlaylistParse {
        url: url.to_string(),
        reason,
    })
}

fn checked(playlist: MediaPlaylist) -> PipelineResult<MediaPlaylist> {
    if playlist.segments.is_empty() {
        return Err(PipelineError::PlaylistParse {
            url: playlist.uri.to_string(),
            reason: "media playlist contains no segments".to_owned(),
        });
    }

    Ok(playlist)
}
