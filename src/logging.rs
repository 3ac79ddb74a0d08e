use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// lines older than this are dropped when logging is set up
pub const RETENTION: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Error, Debug)]
pub enum LogError {
    #[error("could not open log file {}: {}", .0.display(), .1)]
    Open(PathBuf, io::Error),
    #[error("log io error: {0}")]
    Io(#[from] io::Error),
    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Who is logging: the CLI also talks to the terminal, the tunnel worker only to the file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LogOutput {
    FileAndConsole,
    FileOnly,
}

/// Installs the global subscriber: a timestamped file layer at DEBUG and, for the CLI,
/// a bare message layer on stdout at INFO (`RUST_LOG` overrides the console level).
pub(crate) fn init(log_file: &Path, output: LogOutput) -> Result<(), LogError> {
    if output == LogOutput::FileAndConsole {
        // best effort, a failed pass never prevents logging
        let _ = retain_recent(log_file, RETENTION, Utc::now());
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|e| LogError::Open(log_file.into(), e))?;

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(Mutex::new(file))
        .with_filter(LevelFilter::DEBUG);

    let console_layer = (output == LogOutput::FileAndConsole).then(|| {
        fmt::layer()
            .without_time()
            .with_level(false)
            .with_target(false)
            .with_writer(io::stdout)
            .with_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)
}

/// Drops every line whose leading timestamp is older than `max_age`. Lines without a
/// parseable timestamp (continuations, foreign output) are kept.
pub(crate) fn retain_recent(
    log_file: &Path,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Result<usize, LogError> {
    let contents = match std::fs::read_to_string(log_file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let cutoff = now - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
    let mut dropped = 0;
    let kept: String = contents
        .split_inclusive('\n')
        .filter(|line| match line_timestamp(line) {
            Some(ts) if ts < cutoff => {
                dropped += 1;
                false
            }
            _ => true,
        })
        .collect();
    if dropped > 0 {
        rewrite(log_file, &kept, contents.len() as u64)?;
    }
    Ok(dropped)
}

/// Replaces the first `seen` bytes of the log with `kept`, carrying over whatever a
/// running daemon appended after they were read. Bytes appended between that last read
/// and the truncation are still lost, so retention is best effort while a daemon logs.
fn rewrite(log_file: &Path, kept: &str, seen: u64) -> Result<(), LogError> {
    let mut file = OpenOptions::new().read(true).write(true).open(log_file)?;
    file.seek(SeekFrom::Start(seen))?;
    let mut appended = Vec::new();
    file.read_to_end(&mut appended)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(kept.as_bytes())?;
    file.write_all(&appended)?;
    Ok(())
}

fn line_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let first = line.split_whitespace().next()?;
    DateTime::parse_from_rfc3339(first)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Empties the log file (`logs --clean`).
pub(crate) fn clean(log_file: &Path) -> Result<(), LogError> {
    File::create(log_file).map_err(|e| LogError::Open(log_file.into(), e))?;
    Ok(())
}

/// Prints the log file and keeps printing whatever gets appended until Ctrl-C.
pub(crate) async fn follow(log_file: &Path, out: &mut impl Write) -> Result<(), LogError> {
    let mut file = File::open(log_file).map_err(|e| LogError::Open(log_file.into(), e))?;
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Ok(()),
            _ = interval.tick() => {
                // the file may have been cleaned under us
                let len = file.metadata()?.len();
                if file.stream_position()? > len {
                    file.seek(SeekFrom::Start(0))?;
                }
                copy_new(&mut file, out)?;
            }
        }
    }
}

fn copy_new(file: &mut File, out: &mut impl Write) -> Result<(), LogError> {
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    if !buf.is_empty() {
        out.write_all(&buf)?;
        out.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-18T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn drops_only_old_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rdst.log");
        std::fs::write(
            &path,
            "2026-10-18T09:00:00.000000Z  INFO supervisor: too old\n\
             2026-10-18T10:30:00.000000Z  INFO supervisor: recent\n\
             a line without a timestamp\n\
             2026-10-18T09:59:59.999999Z ERROR tunnel: just too old\n\
             2026-10-18T11:59:00.123456Z DEBUG probe: very recent\n",
        )
        .unwrap();
        let dropped = retain_recent(&path, RETENTION, now()).unwrap();
        assert_eq!(dropped, 2);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "2026-10-18T10:30:00.000000Z  INFO supervisor: recent\n\
             a line without a timestamp\n\
             2026-10-18T11:59:00.123456Z DEBUG probe: very recent\n"
        );
    }

    #[test]
    fn lines_appended_after_the_read_survive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rdst.log");
        let seen = "2026-10-18T09:00:00Z  INFO old\n2026-10-18T11:00:00Z  INFO new\n";
        std::fs::write(&path, seen).unwrap();
        // the daemon keeps appending while retention works on what it read
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"2026-10-18T11:59:00Z  INFO late\n")
            .unwrap();
        rewrite(&path, "2026-10-18T11:00:00Z  INFO new\n", seen.len() as u64).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "2026-10-18T11:00:00Z  INFO new\n2026-10-18T11:59:00Z  INFO late\n"
        );
    }

    #[test]
    fn open_errors_name_the_file() {
        let err = LogError::Open(
            PathBuf::from("/var/log/rdst.log"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(
            err.to_string(),
            "could not open log file /var/log/rdst.log: denied"
        );
    }

    #[test]
    fn keeps_unparseable_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rdst.log");
        let contents = "2026-13-45 garbage\n\n   indented continuation\nno newline at the end";
        std::fs::write(&path, contents).unwrap();
        assert_eq!(retain_recent(&path, RETENTION, now()).unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), contents);
    }

    #[test]
    fn missing_log_is_fine() {
        let dir = TempDir::new().unwrap();
        let dropped = retain_recent(&dir.path().join("nope.log"), RETENTION, now()).unwrap();
        assert_eq!(dropped, 0);
    }

    #[test]
    fn clean_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rdst.log");
        std::fs::write(&path, "something\n").unwrap();
        clean(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn copies_appended_bytes_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rdst.log");
        std::fs::write(&path, "first\n").unwrap();
        let mut file = File::open(&path).unwrap();
        let mut out = Vec::new();
        copy_new(&mut file, &mut out).unwrap();
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"second\n")
            .unwrap();
        copy_new(&mut file, &mut out).unwrap();
        copy_new(&mut file, &mut out).unwrap();
        assert_eq!(out, b"first\nsecond\n");
    }
}
