//! Utility functions for the LedgerLink SDK
//!
//! Includes id generation, wall-clock helpers, atomic file writes and logging setup

/// Common utility functions
pub mod common {
    use chrono::Utc;

    /// Generate a unique identifier (UUID v4)
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Current wall-clock time in milliseconds since the unix epoch
    pub fn unix_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Truncate an identity, hash or id for log output
    pub fn short(value: &str) -> String {
        value.chars().take(8).collect()
    }
}

/// Filesystem helpers shared by the persisted stores
pub mod fs {
    use std::fs;
    use std::io::Write;
    use std::path::Path;

    /// Write `bytes` to `path` through a temporary sibling file and a rename,
    /// so a crash never leaves a half-written record behind.
    pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, path)
    }

    /// Remove a file if it exists
    pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Parse a textual log level, defaulting to INFO
pub fn parse_log_level(level: Option<&str>) -> tracing::Level {
    match level {
        Some("trace") => tracing::Level::TRACE,
        Some("debug") => tracing::Level::DEBUG,
        Some("info") => tracing::Level::INFO,
        Some("warn") => tracing::Level::WARN,
        Some("error") => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Install the global tracing subscriber. Safe to call more than once.
pub fn init_logging(level: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_log_level(level))
        .try_init();
}
