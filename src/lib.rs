pub mod commands;
pub mod cookie;
pub mod downloader;
pub mod error;
pub mod hls;
pub mod logger;
pub mod merger;
pub mod playlist;
pub mod progress;
pub mod utils;

pub use error::{PipelineError, PipelineResult};
pub use reqwest;
