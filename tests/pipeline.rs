use hlsget::{
    downloader::{self, DownloadOptions, PipelineState, SegmentOutcome},
    progress::Progress,
    reqwest::Client,
};
use std::{
    fs,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tempfile::TempDir;

mod server {
    use std::{
        net::SocketAddr,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    pub struct Response {
        pub status: u16,
        pub body: Vec<u8>,
        pub delay: Option<Duration>,
    }

    impl Response {
        pub fn ok(body: impl Into<Vec<u8>>) -> Self {
            Self {
                status: 200,
                body: body.into(),
                delay: None,
            }
        }

        pub fn status(status: u16) -> Self {
            Self {
                status,
                body: vec![],
                delay: None,
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    pub type Handler = Arc<dyn Fn(&str) -> Response + Send + Sync>;

    pub struct TestServer {
        pub addr: SocketAddr,
        /// Highest number of requests that were being served at one time.
        pub max_inflight: Arc<AtomicUsize>,
    }

    impl TestServer {
        pub fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }
    }

    /// One-connection-per-request HTTP responder; just enough protocol for
    /// a reqwest client pointed at loopback.
    pub async fn spawn(handler: Handler) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let max_inflight = Arc::new(AtomicUsize::new(0));
        let inflight = Arc::new(AtomicUsize::new(0));
        let max_handle = max_inflight.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let handler = handler.clone();
                let inflight = inflight.clone();
                let max_inflight = max_handle.clone();

                tokio::spawn(async move {
                    let mut buf = vec![0_u8; 8192];
                    let mut read = 0;

                    while !buf[..read].windows(4).any(|x| x == b"\r\n\r\n") {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read += n,
                        }

                        if read == buf.len() {
                            return;
                        }
                    }

                    let request = String::from_utf8_lossy(&buf[..read]).into_owned();
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_owned();

                    let current = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inflight.fetch_max(current, Ordering::SeqCst);

                    let response = handler(&path);

                    if let Some(delay) = response.delay {
                        tokio::time::sleep(delay).await;
                    }

                    inflight.fetch_sub(1, Ordering::SeqCst);

                    let reason = match response.status {
                        200 => "OK",
                        404 => "Not Found",
                        500 => "Internal Server Error",
                        _ => "Unknown",
                    };
                    let head = format!(
                        "HTTP/1.1 {} {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        response.status,
                        reason,
                        response.body.len()
                    );

                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&response.body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        TestServer { addr, max_inflight }
    }
}

mod aes_helper {
    use aes::cipher::{generic_array::GenericArray, BlockEncryptMut, KeyIvInit};

    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    pub fn encrypt(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        let pad = 16 - plaintext.len() % 16;
        let mut data = plaintext.to_vec();
        data.extend(std::iter::repeat(pad as u8).take(pad));

        let mut cipher = Aes128CbcEnc::new(key.into(), iv.into());
        for block in data.chunks_exact_mut(16) {
            cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }

        data
    }

    pub fn index_iv(index: u64) -> [u8; 16] {
        (index as u128).to_be_bytes()
    }
}

use server::{Response, TestServer};

fn media_playlist(segment_uris: &[&str], key_line: Option<&str>) -> String {
    let mut text = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n");

    if let Some(key_line) = key_line {
        text.push_str(key_line);
        text.push('\n');
    }

    for uri in segment_uris {
        text.push_str("#EXTINF:4.0,\n");
        text.push_str(uri);
        text.push('\n');
    }

    text.push_str("#EXT-X-ENDLIST\n");
    text
}

struct Run {
    _dir: TempDir,
    state: Arc<PipelineState>,
    options: DownloadOptions,
}

fn run_setup(threads: usize) -> Run {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(PipelineState::new(dir.path().join("segments")));
    let options = DownloadOptions {
        output: dir.path().join("out.mp4"),
        threads,
        keep_temp: false,
    };

    Run {
        _dir: dir,
        state,
        options,
    }
}

async fn execute(server: &TestServer, run: &Run) -> downloader::RunSummary {
    downloader::run(
        &Client::new(),
        server.url("/index.m3u8").parse().unwrap(),
        run.state.clone(),
        &run.options,
        Arc::new(Progress::new()),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn four_clear_segments_concatenate_in_index_order() {
    let payloads: Vec<Vec<u8>> = (0..4_u8).map(|i| vec![i; 64 + i as usize]).collect();
    let served = payloads.clone();

    let server = server::spawn(Arc::new(move |path| match path {
        "/index.m3u8" => Response::ok(media_playlist(
            &["seg0.ts", "seg1.ts", "seg2.ts", "seg3.ts"],
            None,
        )),
        "/seg0.ts" => Response::ok(served[0].clone()),
        "/seg1.ts" => Response::ok(served[1].clone()),
        "/seg2.ts" => Response::ok(served[2].clone()),
        "/seg3.ts" => Response::ok(served[3].clone()),
        _ => Response::status(404),
    }))
    .await;

    let run = run_setup(4);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let progress = Arc::new(Progress::with_callback(Box::new(move |message, percent| {
        sink.lock().unwrap().push((message.to_owned(), percent));
    })));

    let summary = downloader::run(
        &Client::new(),
        server.url("/index.m3u8").parse().unwrap(),
        run.state.clone(),
        &run.options,
        progress,
    )
    .await
    .unwrap();

    assert!(summary.success);
    assert_eq!(summary.results.len(), 4);
    assert!(summary.results.iter().all(|x| x.is_success()));
    assert_eq!(summary.output.as_deref(), Some(run.options.output.as_path()));

    let expected: Vec<u8> = payloads.concat();
    assert_eq!(fs::read(&run.options.output).unwrap(), expected);

    // Temp directory is cleaned up after a successful merge.
    assert!(!run.state.temp_dir().exists());

    // One percent-bearing event per completed segment, reaching 100.
    let events = events.lock().unwrap();
    let percents: Vec<f32> = events.iter().filter_map(|x| x.1).collect();
    assert_eq!(percents.len(), 4);
    assert!(percents.contains(&100.0));
}

#[tokio::test]
async fn master_playlist_resolves_to_first_variant() {
    let server = server::spawn(Arc::new(|path| match path {
        "/index.m3u8" => Response::ok(
            "#EXTM3U\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720\n\
             hd/media.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
             sd/media.m3u8\n",
        ),
        // Segment uris are relative to the variant, not the master.
        "/hd/media.m3u8" => Response::ok(media_playlist(&["a.ts", "b.ts"], None)),
        "/hd/a.ts" => Response::ok(&b"hd-first"[..]),
        "/hd/b.ts" => Response::ok(&b"hd-second"[..]),
        _ => Response::status(404),
    }))
    .await;

    let run = run_setup(2);
    let summary = execute(&server, &run).await;

    assert!(summary.success);
    assert_eq!(fs::read(&run.options.output).unwrap(), b"hd-firsthd-second");
}

#[tokio::test]
async fn aes_segments_with_explicit_iv_decrypt_to_plaintext() {
    const KEY: [u8; 16] = *b"sixteen byte key";
    const IV: [u8; 16] = *b"sixteen byte iv!";

    let clear: Vec<Vec<u8>> = vec![b"first segment payload".to_vec(), vec![0x42; 188]];
    let enc: Vec<Vec<u8>> = clear
        .iter()
        .map(|x| aes_helper::encrypt(x, &KEY, &IV))
        .collect();

    let key_line = format!(
        "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x{}",
        hex::encode(IV)
    );

    let server = server::spawn(Arc::new(move |path| match path {
        "/index.m3u8" => Response::ok(media_playlist(&["s0.ts", "s1.ts"], Some(key_line.as_str()))),
        "/key.bin" => Response::ok(KEY.to_vec()),
        "/s0.ts" => Response::ok(enc[0].clone()),
        "/s1.ts" => Response::ok(enc[1].clone()),
        _ => Response::status(404),
    }))
    .await;

    let run = run_setup(2);
    let summary = execute(&server, &run).await;

    assert!(summary.success);
    assert_eq!(fs::read(&run.options.output).unwrap(), clear.concat());
}

#[tokio::test]
async fn aes_segments_without_iv_use_index_derivation_and_cache_the_key() {
    const KEY: [u8; 16] = *b"0123456789abcdef";

    let clear: Vec<Vec<u8>> = (0..3_u8).map(|i| vec![i + 10; 47]).collect();
    let enc: Vec<Vec<u8>> = clear
        .iter()
        .enumerate()
        .map(|(i, x)| aes_helper::encrypt(x, &KEY, &aes_helper::index_iv(i as u64)))
        .collect();

    let key_hits = Arc::new(AtomicUsize::new(0));
    let hits = key_hits.clone();

    let server = server::spawn(Arc::new(move |path| match path {
        "/index.m3u8" => Response::ok(media_playlist(
            &["s0.ts", "s1.ts", "s2.ts"],
            Some("#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\""),
        )),
        "/key.bin" => {
            hits.fetch_add(1, Ordering::SeqCst);
            Response::ok(KEY.to_vec())
        }
        "/s0.ts" => Response::ok(enc[0].clone()),
        "/s1.ts" => Response::ok(enc[1].clone()),
        "/s2.ts" => Response::ok(enc[2].clone()),
        _ => Response::status(404),
    }))
    .await;

    // Sequential so the first reference is the only fetch; racing first
    // references are allowed to double-fetch.
    let run = run_setup(1);
    let summary = execute(&server, &run).await;

    assert!(summary.success);
    assert_eq!(fs::read(&run.options.output).unwrap(), clear.concat());
    assert_eq!(key_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn key_fetch_failure_keeps_raw_segment_bytes() {
    let payload = vec![0x77_u8; 32];
    let served = payload.clone();

    let server = server::spawn(Arc::new(move |path| match path {
        "/index.m3u8" => Response::ok(media_playlist(
            &["s0.ts"],
            Some("#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\""),
        )),
        "/key.bin" => Response::status(404),
        "/s0.ts" => Response::ok(served.clone()),
        _ => Response::status(404),
    }))
    .await;

    let run = run_setup(1);
    let summary = execute(&server, &run).await;

    // Key failure is non-fatal; the undecrypted bytes are persisted.
    assert!(summary.success);
    assert_eq!(fs::read(&run.options.output).unwrap(), payload);
}

#[tokio::test]
async fn segment_succeeds_on_the_third_attempt() {
    let seg_hits = Arc::new(AtomicUsize::new(0));
    let hits = seg_hits.clone();

    let server = server::spawn(Arc::new(move |path| match path {
        "/index.m3u8" => Response::ok(media_playlist(&["flaky.ts"], None)),
        "/flaky.ts" => {
            if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                Response::status(500)
            } else {
                Response::ok(&b"finally"[..])
            }
        }
        _ => Response::status(404),
    }))
    .await;

    let run = run_setup(1);
    let summary = execute(&server, &run).await;

    assert!(summary.success);
    assert_eq!(summary.results[0].attempts, 3);
    assert_eq!(seg_hits.load(Ordering::SeqCst), 3);
    assert_eq!(fs::read(&run.options.output).unwrap(), b"finally");
}

#[tokio::test]
async fn segment_fails_after_exactly_three_attempts() {
    let seg_hits = Arc::new(AtomicUsize::new(0));
    let hits = seg_hits.clone();

    let server = server::spawn(Arc::new(move |path| match path {
        "/index.m3u8" => Response::ok(media_playlist(&["good.ts", "bad.ts"], None)),
        "/good.ts" => Response::ok(&b"fine"[..]),
        "/bad.ts" => {
            hits.fetch_add(1, Ordering::SeqCst);
            Response::status(500)
        }
        _ => Response::status(404),
    }))
    .await;

    let run = run_setup(2);
    let summary = execute(&server, &run).await;

    assert!(!summary.success);
    assert!(summary.output.is_none());
    assert_eq!(seg_hits.load(Ordering::SeqCst), 3);

    let bad = &summary.results[1];
    assert_eq!(bad.index, 1);
    assert_eq!(bad.attempts, 3);
    assert!(matches!(&bad.outcome, SegmentOutcome::Failed { .. }));

    // Fetched segments are kept so a rerun can resume.
    assert!(run.state.segment_path(0).is_file());
    assert!(!run.options.output.exists());
}

#[tokio::test]
async fn rerun_skips_segments_already_on_disk() {
    let seg_hits = Arc::new(AtomicUsize::new(0));
    let hits = seg_hits.clone();

    let server = server::spawn(Arc::new(move |path| match path {
        "/index.m3u8" => Response::ok(media_playlist(&["s0.ts", "s1.ts"], None)),
        "/s0.ts" | "/s1.ts" => {
            hits.fetch_add(1, Ordering::SeqCst);
            Response::ok(path.as_bytes().to_vec())
        }
        _ => Response::status(404),
    }))
    .await;

    let mut run = run_setup(2);
    run.options.keep_temp = true;

    let first = execute(&server, &run).await;
    assert!(first.success);
    assert_eq!(seg_hits.load(Ordering::SeqCst), 2);

    // Fresh state, same working directory: zero segment fetches.
    let rerun_state = Arc::new(PipelineState::new(run.state.temp_dir()));
    let second = downloader::run(
        &Client::new(),
        server.url("/index.m3u8").parse().unwrap(),
        rerun_state,
        &run.options,
        Arc::new(Progress::new()),
    )
    .await
    .unwrap();

    assert!(second.success);
    assert_eq!(seg_hits.load(Ordering::SeqCst), 2);
    assert!(second.results.iter().all(|x| x.attempts == 0));
}

#[tokio::test]
async fn at_most_three_fetches_in_flight_with_three_threads() {
    let server = server::spawn(Arc::new(|path| match path {
        "/index.m3u8" => Response::ok(media_playlist(
            &[
                "s0.ts", "s1.ts", "s2.ts", "s3.ts", "s4.ts", "s5.ts", "s6.ts", "s7.ts", "s8.ts",
                "s9.ts",
            ],
            None,
        )),
        _ if path.ends_with(".ts") => {
            Response::ok(&b"x"[..]).with_delay(Duration::from_millis(30))
        }
        _ => Response::status(404),
    }))
    .await;

    let run = run_setup(3);
    let summary = execute(&server, &run).await;

    assert!(summary.success);
    assert_eq!(summary.results.len(), 10);
    assert!(server.max_inflight.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn cancellation_stops_new_dispatch_but_keeps_completed_results() {
    let seg_hits = Arc::new(AtomicUsize::new(0));

    let run = run_setup(1);
    let hits = seg_hits.clone();
    let state = run.state.clone();

    let server = server::spawn(Arc::new(move |path| match path {
        "/index.m3u8" => Response::ok(media_playlist(
            &["s0.ts", "s1.ts", "s2.ts", "s3.ts", "s4.ts"],
            None,
        )),
        _ if path.ends_with(".ts") => {
            hits.fetch_add(1, Ordering::SeqCst);
            // Raised while the first segment is still being served; with one
            // worker every later segment sees the flag before dispatch.
            state.cancel();
            Response::ok(&b"served"[..])
        }
        _ => Response::status(404),
    }))
    .await;

    let summary = execute(&server, &run).await;

    assert!(!summary.success);
    assert_eq!(seg_hits.load(Ordering::SeqCst), 1);

    assert!(summary.results[0].is_success());
    for result in &summary.results[1..] {
        match &result.outcome {
            SegmentOutcome::Failed { reason } => assert_eq!(reason, "cancelled"),
            SegmentOutcome::Success { .. } => panic!("segment should not have been dispatched"),
        }
    }
}

#[tokio::test]
async fn cancelling_before_dispatch_fetches_nothing() {
    let seg_hits = Arc::new(AtomicUsize::new(0));
    let hits = seg_hits.clone();

    let server = server::spawn(Arc::new(move |path| match path {
        "/index.m3u8" => Response::ok(media_playlist(&["s0.ts", "s1.ts"], None)),
        _ if path.ends_with(".ts") => {
            hits.fetch_add(1, Ordering::SeqCst);
            Response::ok(&b"x"[..])
        }
        _ => Response::status(404),
    }))
    .await;

    let run = run_setup(2);
    run.state.cancel();

    let summary = execute(&server, &run).await;

    assert!(!summary.success);
    assert_eq!(seg_hits.load(Ordering::SeqCst), 0);
    assert!(summary
        .results
        .iter()
        .all(|x| matches!(&x.outcome, SegmentOutcome::Failed { reason } if reason == "cancelled")));
}

#[tokio::test]
async fn missing_playlist_is_a_fatal_fetch_error() {
    let server = server::spawn(Arc::new(|_| Response::status(404))).await;
    let run = run_setup(1);

    let err = downloader::run(
        &Client::new(),
        server.url("/index.m3u8").parse().unwrap(),
        run.state.clone(),
        &run.options,
        Arc::new(Progress::new()),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, hlsget::PipelineError::PlaylistFetch { .. }));
}

#[tokio::test]
async fn malformed_playlist_is_a_fatal_parse_error() {
    let server =
        server::spawn(Arc::new(|_| Response::ok(&b"<html>not a playlist</html>"[..]))).await;
    let run = run_setup(1);

    let err = downloader::run(
        &Client::new(),
        server.url("/index.m3u8").parse().unwrap(),
        run.state.clone(),
        &run.options,
        Arc::new(Progress::new()),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, hlsget::PipelineError::PlaylistParse { .. }));
}
