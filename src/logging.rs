//! Logging setup: a `tracing-subscriber` fmt subscriber with optional JSON
//! output and optional time-rotated log files.
use crate::config::ConfigSource;
use crate::core::{Result, StoreError};
use chrono::Local;
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter};

const DEFAULT_ROTATE_HOURS: u64 = 24;
const DEFAULT_ROTATION: Duration = Duration::from_secs(DEFAULT_ROTATE_HOURS * 60 * 60);
const DEFAULT_RETENTION: usize = 7;
const FILE_TIMESTAMP: &str = "%Y%m%dT%H%M%S%.3f";

/// Logger settings, read from the `[log]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub level: String,
    pub json: bool,
    /// Name recorded on the root span of the binary
    pub module: String,
    /// Log to `<directory>/<file_prefix>-<timestamp>.log` instead of stdout
    pub file_prefix: Option<String>,
    pub directory: PathBuf,
    pub rotate_hours: u64,
    /// Number of rotated files kept on disk
    pub retention: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "debug".to_string(),
            json: false,
            module: env!("CARGO_PKG_NAME").to_string(),
            file_prefix: None,
            directory: PathBuf::from("."),
            rotate_hours: DEFAULT_ROTATE_HOURS,
            retention: DEFAULT_RETENTION,
        }
    }
}

impl LoggingConfig {
    pub fn from_source(source: &ConfigSource) -> Result<Self> {
        source.section("log")
    }

    /// Rotation period. Zero hours falls back to the default of a day.
    pub fn rotate_every(&self) -> Duration {
        if self.rotate_hours == 0 {
            DEFAULT_ROTATION
        } else {
            Duration::from_secs(self.rotate_hours * 60 * 60)
        }
    }
}

/// Maps a level name to a filter. Unknown names fall back to `debug`.
pub fn level_filter(level: &str) -> LevelFilter {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" | "fatal" | "panic" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::DEBUG,
    }
}

/// Installs the global subscriber. `RUST_LOG` directives, when set, are
/// added on top of the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(level_filter(&config.level).into());

    let prefix = config.file_prefix.as_deref().filter(|p| !p.is_empty());
    let writer = match prefix {
        Some(prefix) => BoxMakeWriter::new(RotatingFile::new(
            &config.directory,
            prefix,
            config.rotate_every(),
            config.retention,
        )?),
        None => BoxMakeWriter::new(io::stdout),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| StoreError::Config(format!("failed to install logger: {}", e)))
}

/// Log file that is replaced by a fresh timestamped file once the rotation
/// period has elapsed, keeping at most `retention` files.
#[derive(Debug, Clone)]
pub struct RotatingFile {
    state: Arc<Mutex<RotationState>>,
}

#[derive(Debug)]
struct RotationState {
    directory: PathBuf,
    prefix: String,
    every: Duration,
    retention: usize,
    file: File,
    path: PathBuf,
    opened: Instant,
}

impl RotatingFile {
    pub fn new(directory: &Path, prefix: &str, every: Duration, retention: usize) -> io::Result<Self> {
        fs::create_dir_all(directory)?;
        let (file, path) = open_next(directory, prefix)?;
        let state = RotationState {
            directory: directory.to_path_buf(),
            prefix: prefix.to_string(),
            every,
            retention,
            file,
            path,
            opened: Instant::now(),
        };
        state.prune()?;
        Ok(RotatingFile {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Switches to a new file immediately.
    pub fn rotate(&self) -> io::Result<()> {
        self.lock().rotate()
    }

    pub fn current_path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RotationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RotationState {
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let (file, path) = open_next(&self.directory, &self.prefix)?;
        self.file = file;
        self.path = path;
        self.opened = Instant::now();
        self.prune()
    }

    /// Deletes the oldest files of this prefix beyond the retention count.
    fn prune(&self) -> io::Result<()> {
        let head = format!("{}-", file_stem(&self.prefix));
        let mut files: Vec<PathBuf> = fs::read_dir(&self.directory)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| is_rotated_name(n, &head))
                    .unwrap_or(false)
            })
            .collect();

        // timestamps sort lexicographically
        files.sort();
        let excess = files.len().saturating_sub(self.retention.max(1));
        for stale in files.into_iter().take(excess) {
            if stale != self.path {
                fs::remove_file(stale)?;
            }
        }
        Ok(())
    }
}

/// `<head><timestamp>.log`, where the timestamp starts with a digit
fn is_rotated_name(name: &str, head: &str) -> bool {
    name.ends_with(".log")
        && name
            .strip_prefix(head)
            .and_then(|rest| rest.chars().next())
            .map(|c| c.is_ascii_digit())
            .unwrap_or(false)
}

fn file_stem(prefix: &str) -> String {
    Path::new(prefix)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| prefix.to_string())
}

fn open_next(directory: &Path, prefix: &str) -> io::Result<(File, PathBuf)> {
    let name = format!("{}-{}.log", file_stem(prefix), Local::now().format(FILE_TIMESTAMP));
    let path = directory.join(name);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}

/// Writer handed out per log event
pub struct RotatingWriter {
    state: Arc<Mutex<RotationState>>,
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.opened.elapsed() >= state.every {
            state.rotate()?;
        }
        state.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .file
            .flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFile {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriter {
            state: Arc::clone(&self.state),
        }
    }
}
