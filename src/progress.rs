use colored::Colorize;
use std::{
    io::{self, Write},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Receives `(message, percent)` pairs; `percent` ranges 0-100 and is absent
/// for pure log lines.
pub type ProgressCallback = Box<dyn Fn(&str, Option<f32>) + Send + Sync>;

/// Run progress, shared across fetcher tasks.
///
/// `total` is set once the playlist is resolved; every segment completion
/// ticks the counter and emits an event. Without a callback installed,
/// events go to the `log` facade.
pub struct Progress {
    completed: AtomicUsize,
    total: AtomicUsize,
    callback: Option<ProgressCallback>,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            callback: None,
        }
    }

    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            ..Self::new()
        }
    }

    /// Renders a single updating line on stderr, the way an interactive
    /// download should look.
    pub fn stderr() -> Self {
        Self::with_callback(Box::new(|message, percent| {
            let stderr = io::stderr();
            let mut handle = stderr.lock();

            let _ = match percent {
                Some(percent) => {
                    let line = format!(
                        "\r\x1B[2K{} {}",
                        message,
                        format!("({:.0}%)", percent).cyan()
                    );

                    if percent >= 100.0 {
                        writeln!(handle, "{line}")
                    } else {
                        write!(handle, "{line}")
                    }
                }
                None => writeln!(handle, "\r\x1B[2K{message}"),
            };
            let _ = handle.flush();
        }))
    }

    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Emits a pure log line, no percentage attached.
    pub fn log(&self, message: &str) {
        self.emit(message, None);
    }

    /// Records one segment completion and emits the new fraction complete.
    pub fn tick(&self, message: &str) -> f32 {
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);

        let percent = if total == 0 {
            100.0
        } else {
            done as f32 * 100.0 / total as f32
        };

        self.emit(message, Some(percent));
        percent
    }

    fn emit(&self, message: &str, percent: Option<f32>) {
        match (&self.callback, percent) {
            (Some(callback), _) => callback(message, percent),
            (None, Some(percent)) => log::info!("{} ({:.0}%)", message, percent),
            (None, None) => log::info!("{}", message),
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}
