// src/logfile/rotating.rs
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::config::LogFormat;
use crate::logfile::canonical_log_path;

pub const ENV_ROTATION_WHEN: &str = "LOG_ROTATION_WHEN";
pub const ENV_ROTATION_INTERVAL: &str = "LOG_ROTATION_INTERVAL";
pub const ENV_BACKUP_COUNT: &str = "LOG_BACKUP_COUNT";
pub const ENV_ROTATION_UTC: &str = "LOG_ROTATION_UTC";
pub const ENV_LOG_FILE_FORMAT: &str = "LOG_FILE_FORMAT";

static RE_SUFFIX_SECONDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}$").expect("valid regex"));
static RE_SUFFIX_MINUTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}_\d{2}-\d{2}$").expect("valid regex"));
static RE_SUFFIX_HOURS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}_\d{2}$").expect("valid regex"));
static RE_SUFFIX_DAYS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"));

/// Rotation unit, mirroring the classic `when` codes (S, M, H, D, MIDNIGHT).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RotationWhen {
    Seconds,
    Minutes,
    #[default]
    Hours,
    Days,
    Midnight,
}

impl RotationWhen {
    pub fn parse(code: &str) -> Result<Self> {
        Ok(match code.trim().to_ascii_uppercase().as_str() {
            "S" => Self::Seconds,
            "M" => Self::Minutes,
            "H" => Self::Hours,
            "D" => Self::Days,
            "MIDNIGHT" => Self::Midnight,
            other => bail!("unsupported rotation unit {other:?} (expected S, M, H, D or MIDNIGHT)"),
        })
    }

    fn unit(&self) -> ChronoDuration {
        match self {
            Self::Seconds => ChronoDuration::seconds(1),
            Self::Minutes => ChronoDuration::minutes(1),
            Self::Hours => ChronoDuration::hours(1),
            Self::Days | Self::Midnight => ChronoDuration::days(1),
        }
    }

    /// Anchored pattern matching exactly the suffixes this unit produces.
    fn suffix_pattern(&self) -> &'static Regex {
        match self {
            Self::Seconds => &*RE_SUFFIX_SECONDS,
            Self::Minutes => &*RE_SUFFIX_MINUTES,
            Self::Hours => &*RE_SUFFIX_HOURS,
            Self::Days | Self::Midnight => &*RE_SUFFIX_DAYS,
        }
    }

    fn suffix_format(&self) -> &'static str {
        match self {
            Self::Seconds => "%Y-%m-%d_%H-%M-%S",
            Self::Minutes => "%Y-%m-%d_%H-%M",
            Self::Hours => "%Y-%m-%d_%H",
            Self::Days | Self::Midnight => "%Y-%m-%d",
        }
    }
}

/// Everything that is copied when a handler is cloned for another file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationSettings {
    pub when: RotationWhen,
    pub interval: u32,
    /// Rotated files to keep; 0 keeps all of them.
    pub backup_count: usize,
    pub utc: bool,
    /// Open the file on first write instead of at construction.
    pub delay: bool,
    pub format: LogFormat,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            when: RotationWhen::Hours,
            interval: 1,
            backup_count: 0,
            utc: false,
            delay: false,
            format: LogFormat::Compact,
        }
    }
}

impl RotationSettings {
    /// Defaults overridden by `LOG_ROTATION_WHEN`, `LOG_ROTATION_INTERVAL`,
    /// `LOG_BACKUP_COUNT`, `LOG_ROTATION_UTC` and `LOG_FILE_FORMAT`.
    pub fn from_env() -> Result<Self> {
        let mut s = Self::default();
        if let Some(v) = env_value(ENV_ROTATION_WHEN) {
            s.when = RotationWhen::parse(&v).with_context(|| format!("invalid {ENV_ROTATION_WHEN}"))?;
        }
        if let Some(v) = env_value(ENV_ROTATION_INTERVAL) {
            s.interval = v
                .parse()
                .map_err(|e| anyhow!("invalid {ENV_ROTATION_INTERVAL}: {v:?}: {e}"))?;
        }
        if let Some(v) = env_value(ENV_BACKUP_COUNT) {
            s.backup_count = v
                .parse()
                .map_err(|e| anyhow!("invalid {ENV_BACKUP_COUNT}: {v:?}: {e}"))?;
        }
        if let Some(v) = env_value(ENV_ROTATION_UTC) {
            s.utc = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => bail!("invalid {ENV_ROTATION_UTC}: {other:?}"),
            };
        }
        if let Some(v) = env_value(ENV_LOG_FILE_FORMAT) {
            s.format = match v.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                other => bail!("invalid {ENV_LOG_FILE_FORMAT}: {other:?} (expected 'compact' or 'json')"),
            };
        }
        Ok(s)
    }

    fn period(&self) -> ChronoDuration {
        self.when.unit() * self.interval.max(1) as i32
    }
}

/// Time-based rotating log file.
#[derive(Debug)]
pub struct RotatingFileHandler {
    path: PathBuf,
    settings: RotationSettings,
    file: Option<File>,
    rollover_at: DateTime<Utc>,
}

impl RotatingFileHandler {
    /// Create a handler for the canonical form of `path`, relocated into `logs_dir`
    /// when given. The file is created if missing.
    pub fn create(path: impl AsRef<Path>, settings: RotationSettings, logs_dir: Option<&Path>) -> Result<Self> {
        let path = canonical_log_path(path.as_ref(), logs_dir);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let existing_mtime = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        if existing_mtime.is_none() {
            File::create(&path).with_context(|| format!("creating log file {}", path.display()))?;
        }

        let base = existing_mtime.unwrap_or_else(Utc::now);
        let rollover_at = compute_rollover(&settings, base);
        let mut handler = Self {
            path,
            settings,
            file: None,
            rollover_at,
        };
        if !handler.settings.delay {
            handler.open_file()?;
        }
        Ok(handler)
    }

    /// New handler for `file_name` next to this one, with the same rotation and format.
    pub fn clone_to(&self, file_name: &str, logs_dir: Option<&Path>) -> Result<Self> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new(""));
        Self::create(dir.join(file_name), self.settings.clone(), logs_dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &RotationSettings {
        &self.settings
    }

    pub fn next_rollover(&self) -> DateTime<Utc> {
        self.rollover_at
    }

    fn open_file(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            let f = OpenOptions::new().create(true).append(true).open(&self.path)?;
            self.file = Some(f);
        }
        // Just populated above.
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file not open"))
    }

    /// Rotate when `now` has passed the scheduled rollover. Returns whether it did.
    pub fn rollover_if_due(&mut self, now: DateTime<Utc>) -> io::Result<bool> {
        if now < self.rollover_at {
            return Ok(false);
        }
        self.do_rollover(now)?;
        Ok(true)
    }

    fn do_rollover(&mut self, now: DateTime<Utc>) -> io::Result<()> {
        if let Some(mut f) = self.file.take() {
            f.flush()?;
        }

        let period_start = self.rollover_at - self.settings.period();
        let suffix = if self.settings.utc {
            period_start.format(self.settings.when.suffix_format()).to_string()
        } else {
            period_start
                .with_timezone(&Local)
                .format(self.settings.when.suffix_format())
                .to_string()
        };
        let rotated = PathBuf::from(format!("{}.{suffix}", self.path.display()));
        if rotated.exists() {
            fs::remove_file(&rotated)?;
        }
        if self.path.exists() {
            fs::rename(&self.path, &rotated)?;
        }
        self.prune_backups()?;

        let mut next = self.rollover_at;
        while next <= now {
            next = compute_rollover(&self.settings, next);
        }
        self.rollover_at = next;

        if !self.settings.delay {
            self.open_file()?;
        }
        Ok(())
    }

    /// Rotated siblings of this file, oldest first. Only names carrying this
    /// handler's timestamp suffix count; other files in the directory are left alone.
    pub fn backups(&self) -> io::Result<Vec<PathBuf>> {
        let Some(name) = self.path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Ok(Vec::new());
        };
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = format!("{name}.");
        let pattern = self.settings.when.suffix_pattern();
        let mut out: Vec<PathBuf> = fs::read_dir(&dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| {
                        n.to_string_lossy()
                            .strip_prefix(&prefix)
                            .is_some_and(|suffix| pattern.is_match(suffix))
                    })
                    .unwrap_or(false)
            })
            .collect();
        // Suffixes are zero-padded timestamps, so lexical order is chronological.
        out.sort();
        Ok(out)
    }

    fn prune_backups(&self) -> io::Result<()> {
        if self.settings.backup_count == 0 {
            return Ok(());
        }
        let backups = self.backups()?;
        let excess = backups.len().saturating_sub(self.settings.backup_count);
        for old in backups.into_iter().take(excess) {
            fs::remove_file(old)?;
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn compute_rollover(settings: &RotationSettings, from: DateTime<Utc>) -> DateTime<Utc> {
    match settings.when {
        RotationWhen::Midnight => {
            let extra_days = ChronoDuration::days(settings.interval.max(1) as i64 - 1);
            next_midnight(from, settings.utc) + extra_days
        }
        _ => from + settings.period(),
    }
}

fn next_midnight(from: DateTime<Utc>, utc: bool) -> DateTime<Utc> {
    if utc {
        let day = from.date_naive() + ChronoDuration::days(1);
        Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
    } else {
        let local = from.with_timezone(&Local);
        let day = local.date_naive() + ChronoDuration::days(1);
        Local
            .from_local_datetime(&day.and_time(NaiveTime::MIN))
            .earliest()
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|| from + ChronoDuration::days(1))
    }
}

impl Write for RotatingFileHandler {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.rollover_if_due(Utc::now())?;
        self.open_file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}
