// src/logfile/mod.rs
//! Canonical log-file naming plus a small time-rotating file writer.

pub mod registry;
pub mod rotating;

pub use registry::{file_layer, HandlerRegistry, HandlerWriter, SharedHandler};
pub use rotating::{RotatingFileHandler, RotationSettings, RotationWhen};

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Directory that overrides where log files are placed.
pub const ENV_LOGS_PATH: &str = "GATEWAY_LOGS_PATH";
pub const LOG_EXTENSION: &str = ".log";

static RE_DELIMITER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s-]+").expect("valid regex"));
// No look-behind in `regex`; the uppercase letter is never a valid first char of
// the next match, so consuming the preceding char is equivalent.
static RE_CAMEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid regex"));
static RE_SPECIAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("valid regex"));
static RE_MULTI_UNDERSCORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").expect("valid regex"));

/// `"Modbus-TCP connector"` → `"modbus_tcp_connector"`, `"restConnector2Main"` →
/// `"rest_connector2_main"`.
pub fn to_snake_case(name: &str) -> String {
    let s = RE_DELIMITER.replace_all(name, "_");
    let s = RE_CAMEL.replace_all(&s, "${1}_${2}");
    let s = s.to_lowercase();
    let s = RE_SPECIAL.replace_all(&s, "");
    let s = RE_MULTI_UNDERSCORE.replace_all(&s, "_");
    s.trim_matches('_').to_string()
}

/// Snake-case the file name of `path` (keeping a `.log` extension) and, when
/// `logs_dir` is given, move it into that directory.
pub fn canonical_log_path(path: &Path, logs_dir: Option<&Path>) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name.strip_suffix(LOG_EXTENSION).unwrap_or(&file_name);
    let final_name = format!("{}{LOG_EXTENSION}", to_snake_case(stem));

    match logs_dir {
        Some(dir) => dir.join(final_name),
        None => path.with_file_name(final_name),
    }
}

/// Logs directory from `$GATEWAY_LOGS_PATH`, if set and non-empty.
pub fn logs_dir_from_env() -> Option<PathBuf> {
    std::env::var(ENV_LOGS_PATH)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

pub(crate) fn with_log_extension(file_name: &str) -> String {
    if file_name.ends_with(LOG_EXTENSION) {
        file_name.to_string()
    } else {
        format!("{file_name}{LOG_EXTENSION}")
    }
}
