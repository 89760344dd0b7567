/*
================================================================================
                            LabelSkater Logging
================================================================================

Console logging through `env_logger`, plus an in-memory copy of the most
recent lines so they can be written out on demand or after a panic.

- `setup_logger()`: installs a composite logger (colored console output and
  a ring buffer of the last 1000 lines from this crate)
- `setup_panic_hook()`: writes panic.log with the backtrace and the buffered
  lines, and prints the backtrace to stderr
- `export_debug_logs()`: writes the buffered lines to debug.log

Log levels: `RUST_LOG` wins when set. Otherwise debug builds show DEBUG and
above for this crate, release builds INFO and above. Other crates are off.

Files go to `<data_dir>/<app_name>/logs/` (see the `dirs` crate).
================================================================================
*/

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use env_logger::fmt::{Color, Formatter};
use log::{LevelFilter, Metadata, Record};

#[allow(unused_imports)]
use log::{Level, debug, info, warn, error};

const MAX_LOG_LINES: usize = 1000;
const LOG_TARGET: &str = "labelskater";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub type LogBuffer = Arc<Mutex<VecDeque<String>>>;

fn lock_buffer(buffer: &LogBuffer) -> MutexGuard<'_, VecDeque<String>> {
    // A panic while holding the lock must not hide the log lines.
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct BufferLogger {
    log_buffer: LogBuffer,
}

impl BufferLogger {
    fn new() -> Self {
        Self {
            log_buffer: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LOG_LINES))),
        }
    }

    fn log_to_buffer(&self, message: &str, target: &str, line: Option<u32>) {
        if !target.starts_with(LOG_TARGET) {
            return;
        }

        let mut buffer = lock_buffer(&self.log_buffer);
        if buffer.len() == MAX_LOG_LINES {
            buffer.pop_front();
        }

        // The module is already in the target
        let formatted_message = if let Some(line_num) = line {
            format!("{target}:{line_num} {message}")
        } else {
            format!("{target} {message}")
        };

        buffer.push_back(formatted_message);
    }

    fn get_shared_buffer(&self) -> LogBuffer {
        Arc::clone(&self.log_buffer)
    }
}

impl log::Log for BufferLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with(LOG_TARGET) && metadata.level() <= LevelFilter::Debug
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let message = format!("{:<5} {}", record.level(), record.args());
            self.log_to_buffer(&message, record.target(), record.line());
        }
    }

    fn flush(&self) {}
}

struct CompositeLogger {
    console_logger: env_logger::Logger,
    buffer_logger: BufferLogger,
}

impl log::Log for CompositeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console_logger.enabled(metadata) || self.buffer_logger.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.console_logger.enabled(record.metadata()) {
            self.console_logger.log(record);
        }
        if self.buffer_logger.enabled(record.metadata()) {
            self.buffer_logger.log(record);
        }
    }

    fn flush(&self) {
        self.console_logger.flush();
        self.buffer_logger.flush();
    }
}

/// Install the global logger and return the shared buffer of recent lines.
pub fn setup_logger() -> LogBuffer {
    let buffer_logger = BufferLogger::new();
    let shared_buffer = buffer_logger.get_shared_buffer();

    let mut builder = env_logger::Builder::new();

    if std::env::var("RUST_LOG").is_ok() {
        builder.parse_env("RUST_LOG");
    } else {
        // Filter out all other crates' logs
        builder.filter(None, LevelFilter::Off);
        if cfg!(debug_assertions) {
            builder.filter(Some(LOG_TARGET), LevelFilter::Debug);
        } else {
            builder.filter(Some(LOG_TARGET), LevelFilter::Info);
        }
    }

    builder.format(|buf: &mut Formatter, record: &Record| {
        let timestamp = Utc::now().format(TIMESTAMP_FORMAT);

        let module_info = match (record.module_path(), record.line()) {
            (Some(module), Some(line)) => format!("{module}:{line}"),
            (Some(module), None) => module.to_string(),
            (None, Some(line)) => format!("line:{line}"),
            (None, None) => "unknown".to_string(),
        };

        let mut level_style = buf.style();
        let mut meta_style = buf.style();

        match record.level() {
            Level::Error => level_style.set_color(Color::Red).set_bold(true),
            Level::Warn => level_style.set_color(Color::Yellow).set_bold(true),
            Level::Info => level_style.set_color(Color::Green).set_bold(true),
            Level::Debug => level_style.set_color(Color::Blue).set_bold(true),
            Level::Trace => level_style.set_color(Color::White),
        };

        // Color::Rgb does not work in the macOS terminal
        #[cfg(target_os = "macos")]
        {
            meta_style.set_color(Color::Blue);
        }

        #[cfg(not(target_os = "macos"))]
        {
            meta_style.set_color(Color::Rgb(120, 120, 120));
        }

        writeln!(
            buf,
            "{} {} {} {}",
            meta_style.value(timestamp),
            level_style.value(record.level()),
            meta_style.value(module_info),
            record.args()
        )
    });

    let composite_logger = CompositeLogger {
        console_logger: builder.build(),
        buffer_logger,
    };

    match log::set_boxed_logger(Box::new(composite_logger)) {
        // Always set the maximum level to Trace so that filtering works correctly
        Ok(()) => log::set_max_level(LevelFilter::Trace),
        Err(e) => eprintln!("Logger already initialized: {e}"),
    }

    shared_buffer
}

pub fn get_log_directory(app_name: &str) -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join(app_name).join("logs")
}

/// Write the buffered log lines to `debug.log` in the log directory.
pub fn export_debug_logs(
    app_name: &str,
    log_buffer: &LogBuffer,
) -> Result<PathBuf, std::io::Error> {
    let log_dir_path = get_log_directory(app_name);
    std::fs::create_dir_all(&log_dir_path)?;

    let debug_log_path = log_dir_path.join("debug.log");
    write_debug_log(&debug_log_path, log_buffer)?;

    info!("Debug logs exported to: {}", debug_log_path.display());
    Ok(debug_log_path)
}

fn write_debug_log(path: &Path, log_buffer: &LogBuffer) -> Result<(), std::io::Error> {
    // Copy first so the lock is not held during file I/O
    let log_entries: Vec<String> = lock_buffer(log_buffer).iter().cloned().collect();

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    let timestamp = Utc::now().format(TIMESTAMP_FORMAT);
    writeln!(file, "{timestamp} [DEBUG EXPORT] LabelSkater debug log export")?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] Maximum captured entries: {MAX_LOG_LINES}")?;
    writeln!(file)?;

    if log_entries.is_empty() {
        writeln!(file, "{timestamp} [DEBUG EXPORT] No log entries found in buffer")?;
    } else {
        for log_entry in &log_entries {
            writeln!(file, "{timestamp} {log_entry}")?;
        }
    }

    writeln!(file)?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] Total entries exported: {}", log_entries.len())?;
    file.flush()
}

/// Replace the panic hook with one that writes `panic.log` (backtrace plus
/// the buffered log lines) and echoes the backtrace to stderr.
pub fn setup_panic_hook(app_name: &str, log_buffer: LogBuffer) {
    let log_dir = get_log_directory(app_name);
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        warn!("Failed to create log directory {}: {}", log_dir.display(), e);
    }
    let log_file_path = log_dir.join("panic.log");

    panic::set_hook(Box::new(move |info| {
        let backtrace = backtrace::Backtrace::new();
        let timestamp = Utc::now().format(TIMESTAMP_FORMAT);

        let location = match info.location() {
            Some(location) => format!("{}:{}", location.file(), location.line()),
            None => "unknown location".to_string(),
        };

        let header_msg = format!("[PANIC] at {location} - {info}");
        let backtrace_header = "[PANIC] Backtrace:";
        let backtrace_lines: Vec<String> = format!("{backtrace:?}")
            .lines()
            .map(|line| format!("[BACKTRACE] {}", line.trim()))
            .collect();

        let written = write_panic_log(
            &log_file_path,
            &timestamp.to_string(),
            &header_msg,
            &backtrace_lines,
            &log_buffer,
        );

        eprintln!("\n\n{header_msg}");
        eprintln!("{backtrace_header}");
        for line in &backtrace_lines {
            eprintln!("{line}");
        }
        match written {
            Ok(()) => eprintln!(
                "\nA complete crash log has been written to: {}",
                log_file_path.display()
            ),
            Err(e) => eprintln!(
                "\nFailed to write crash log to {}: {}",
                log_file_path.display(),
                e
            ),
        }
    }));
}

fn write_panic_log(
    path: &Path,
    timestamp: &str,
    header_msg: &str,
    backtrace_lines: &[String],
    log_buffer: &LogBuffer,
) -> Result<(), std::io::Error> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    writeln!(file, "{timestamp} {header_msg}")?;
    writeln!(file, "{timestamp} [PANIC] Backtrace:")?;
    for line in backtrace_lines {
        writeln!(file, "{timestamp} {line}")?;
    }
    writeln!(file)?;
    writeln!(file)?;

    writeln!(file, "{timestamp} [PANIC] Last {MAX_LOG_LINES} log entries:")?;
    for log in lock_buffer(log_buffer).iter() {
        writeln!(file, "{timestamp} {log}")?;
    }
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_keeps_last_lines_from_this_crate() {
        let logger = BufferLogger::new();
        for i in 0..MAX_LOG_LINES + 5 {
            logger.log_to_buffer(&format!("line {i}"), "labelskater::session", Some(7));
        }
        logger.log_to_buffer("noise", "image::codecs", None);

        let buffer = logger.get_shared_buffer();
        let buffer = lock_buffer(&buffer);
        assert_eq!(buffer.len(), MAX_LOG_LINES);
        assert_eq!(buffer.front().map(String::as_str), Some("labelskater::session:7 line 5"));
        assert!(buffer.iter().all(|line| !line.contains("noise")));
    }

    #[test]
    fn test_write_debug_log_includes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        let logger = BufferLogger::new();
        logger.log_to_buffer("INFO  exported", "labelskater::export", None);

        write_debug_log(&path, &logger.get_shared_buffer()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("labelskater::export INFO  exported"));
        assert!(contents.contains("Total entries exported: 1"));
    }
}
