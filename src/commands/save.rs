use crate::{
    cookie::{CookieJar, CookieParam},
    downloader::{self, DownloadOptions, PipelineState, MAX_THREADS},
    progress::Progress,
    utils,
};
use anyhow::{bail, Context, Result};
use clap::Args;
use cookie::Cookie;
use log::{error, info, warn};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Proxy, Url,
};
use std::{fs, path::Path, path::PathBuf, sync::Arc, time::Duration};

type CookieParams = Vec<CookieParam>;

/// Download an HLS playlist.
#[derive(Debug, Clone, Args)]
pub struct Save {
    /// http(s):// playlist url (.m3u8).
    #[arg(required = true)]
    pub url: Url,

    /// Directory for the output file and the per-run segment directory.
    #[arg(short, long, default_value = "downloads")]
    pub directory: PathBuf,

    /// Output file name, without extension.
    /// Defaults to a name derived from the playlist url, which keeps reruns
    /// resumable because the segment directory stays the same.
    #[arg(short, long)]
    pub output: Option<String>,

    /// Keep downloaded segment files after a successful merge.
    #[arg(long, help_heading = "Download Options")]
    pub keep_temp: bool,

    /// Maximum number of segments downloaded in parallel.
    #[arg(short, long, help_heading = "Download Options", default_value_t = 10, value_parser = clap::value_parser!(u8).range(1..=MAX_THREADS as i64))]
    pub threads: u8,

    /// Fill the request client with existing cookies.
    /// Accepts a document.cookie string, puppeteer-style json, or a path to
    /// a json file.
    #[arg(long, help_heading = "Client Options", default_value = "[]", hide_default_value = true, value_parser = cookie_parser)]
    pub cookies: CookieParams,

    /// Custom header for requests. This option can be used multiple times.
    #[arg(long, help_heading = "Client Options", num_args = 2, value_names = &["KEY", "VALUE"])]
    pub header: Vec<String>,

    /// Proxy address for http requests.
    #[arg(long, help_heading = "Client Options")]
    pub proxy_http: Option<String>,

    /// Proxy address for https requests.
    #[arg(long, help_heading = "Client Options")]
    pub proxy_https: Option<String>,

    /// Fill the request client with cookies scoped per domain.
    /// First value is a set-cookie header, second is the url it applies to.
    /// This option can be used multiple times.
    #[arg(long, help_heading = "Client Options", num_args = 2, value_names = &["SET_COOKIE", "URL"])]
    pub set_cookie: Vec<String>,

    /// User agent header for requests.
    #[arg(
        long,
        help_heading = "Client Options",
        default_value = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36"
    )]
    pub user_agent: String,
}

impl Save {
    fn client(&self) -> Result<Client> {
        let mut client_builder = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(&self.user_agent);

        if !self.header.is_empty() {
            let mut headers = HeaderMap::new();

            for pair in self.header.chunks_exact(2) {
                headers.insert(
                    pair[0].parse::<HeaderName>()?,
                    pair[1].parse::<HeaderValue>()?,
                );
            }

            client_builder = client_builder.default_headers(headers);
        }

        if let Some(proxy) = &self.proxy_http {
            client_builder = client_builder.proxy(Proxy::http(proxy)?);
        }

        if let Some(proxy) = &self.proxy_https {
            client_builder = client_builder.proxy(Proxy::https(proxy)?);
        }

        let mut jar = CookieJar::new();

        for pair in self.set_cookie.chunks_exact(2) {
            jar.add_cookie_str(&pair[0], &pair[1].parse::<Url>()?);
        }

        for cookie in &self.cookies {
            if let Some(url) = &cookie.url {
                jar.add_cookie_str(&format!("{}", cookie.as_cookie()), &url.parse::<Url>()?);
            } else {
                jar.add_cookie(cookie.as_cookie());
            }
        }

        Ok(client_builder.cookie_provider(Arc::new(jar)).build()?)
    }

    pub async fn execute(self) -> Result<()> {
        let client = self.client()?;

        let name = self
            .output
            .clone()
            .unwrap_or_else(|| utils::filename_from_url(&self.url));

        fs::create_dir_all(&self.directory)
            .with_context(|| format!("could not create {}", self.directory.display()))?;

        let output = self.directory.join(format!("{name}.mp4"));
        let temp_dir = self.directory.join(format!("{name}_segments"));

        let state = Arc::new(PipelineState::new(temp_dir));
        watch_ctrl_c(state.clone());

        let options = DownloadOptions {
            output: output.clone(),
            threads: self.threads as usize,
            keep_temp: self.keep_temp,
        };

        let summary = downloader::run(
            &client,
            self.url.clone(),
            state,
            &options,
            Arc::new(Progress::stderr()),
        )
        .await?;

        if !summary.success {
            let failed = summary.results.iter().filter(|x| !x.is_success()).count();
            bail!(
                "{} of {} segments failed to download, rerun to resume.",
                failed,
                summary.results.len()
            );
        }

        info!("Downloaded {}", output.display());
        Ok(())
    }
}

/// First signal stops the run cooperatively, a second one force-exits.
fn watch_ctrl_c(state: Arc<PipelineState>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && !state.is_cancelled() {
            warn!("Ctrl+C received, stopping after in-flight segments.");
            state.cancel();
        }

        if tokio::signal::ctrl_c().await.is_ok() {
            error!("Ctrl+C received again, force exiting.");
            std::process::exit(1);
        }
    });
}

fn cookie_parser(s: &str) -> Result<CookieParams, String> {
    if Path::new(s).exists() {
        serde_json::from_slice::<CookieParams>(
            &fs::read(s).map_err(|_| format!("could not read {}.", s))?,
        )
        .map_err(|_| "could not deserialize cookies from json file.".to_owned())
    } else if let Ok(cookies) = serde_json::from_str::<CookieParams>(s) {
        Ok(cookies)
    } else {
        let mut cookies = vec![];

        for cookie in Cookie::split_parse(s) {
            match cookie {
                Ok(x) => cookies.push(CookieParam::new(x.name(), x.value())),
                Err(_) => return Err("could not split parse cookies.".to_owned()),
            }
        }

        Ok(cookies)
    }
}
