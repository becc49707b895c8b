//! Tracing subscriber setup shared by the mirror binaries.
//!
//! The service logs to the console, to a daily-rolling file, or to both at
//! once. Output is human readable by default and JSON lines on request.
//! `RUST_LOG` always overrides the verbosity chosen in [`LogSettings`].

use serde::{Deserialize, Serialize};
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, EnvFilter};

/// Dependencies whose debug output drowns the mirror's own events.
const NOISY_TARGETS: &[&str] = &["hyper=warn", "h2=warn", "tokio=warn", "sqlx=warn", "rustls=warn"];

const DEFAULT_LOG_FILE: &str = "crates-mirror.log";

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

/// Line format of the formatter layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

/// Logging options, embedded in the service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Lower the default level from `info` to `debug`.
    pub verbose: bool,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Target of the file sink. Setting it without choosing an output
    /// implies [`LogOutput::Both`].
    pub log_file: Option<PathBuf>,
}

impl LogSettings {
    /// The output actually used once `log_file` has been taken into account.
    pub fn effective_output(&self) -> LogOutput {
        match (self.output, &self.log_file) {
            (LogOutput::Console, Some(_)) => LogOutput::Both,
            (output, _) => output,
        }
    }

    /// Path of the file sink, falling back to the temp directory.
    pub fn log_file_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_LOG_FILE))
    }

    /// Filter directives applied when `RUST_LOG` is not set.
    pub fn default_directives(&self) -> String {
        let level = if self.verbose { "debug" } else { "info" };
        std::iter::once(level)
            .chain(NOISY_TARGETS.iter().copied())
            .collect::<Vec<_>>()
            .join(",")
    }
}

// --- Custom "Tee" Writer ---
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A, B> Write for Tee<A, B>
where
    A: Write,
    B: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Each sink gets the whole buffer; a short write on one must not
        // make the caller resend bytes the other already has.
        let res_a = self.a.write_all(buf);
        let res_b = self.b.write_all(buf);
        res_a.and(res_b).map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B, W1, W2> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a, Writer = W1>,
    B: MakeWriter<'a, Writer = W2>,
    W1: Write + 'a,
    W2: Write + 'a,
{
    type Writer = Tee<W1, W2>;
    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

fn build_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.default_directives()))
}

/// Installs the global tracing subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process. Calling this twice is harmless; the second
/// subscriber is discarded.
pub fn init_subscriber(settings: &LogSettings) -> Option<WorkerGuard> {
    let output = settings.effective_output();
    let is_json = settings.format == LogFormat::Json;
    let subscriber = registry().with(build_filter(settings));

    let log_path = settings.log_file_path();
    let log_dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir);
    let log_filename = log_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| DEFAULT_LOG_FILE.into());

    let mut guard: Option<WorkerGuard> = None;

    let installed = match output {
        LogOutput::Both => {
            let file_appender = tracing_appender::rolling::daily(&log_dir, &log_filename);
            let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
            guard = Some(file_guard);

            let tee_writer = MakeTee {
                make_a: std::io::stdout,
                make_b: non_blocking,
            };
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(tee_writer);
            if is_json {
                subscriber.with(fmt_layer.json()).try_init()
            } else {
                subscriber.with(fmt_layer).try_init()
            }
        }
        LogOutput::File => {
            let file_appender = tracing_appender::rolling::daily(&log_dir, &log_filename);
            let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
            guard = Some(file_guard);

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking);
            if is_json {
                subscriber.with(fmt_layer.json()).try_init()
            } else {
                subscriber.with(fmt_layer).try_init()
            }
        }
        LogOutput::Console => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
            if is_json {
                subscriber.with(fmt_layer.json()).try_init()
            } else {
                subscriber.with(fmt_layer).try_init()
            }
        }
    };

    if let Err(e) = installed {
        eprintln!("tracing subscriber already installed: {e}");
    }

    guard
}
