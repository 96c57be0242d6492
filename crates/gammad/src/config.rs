use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    /// Filesystem whose free space is reported through `get_status`.
    pub data_dir: PathBuf,
    pub tick_interval_ms: u64,
    pub telemetry_period_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9999".into(),
            database_url: "sqlite://./data/gammad.db".into(),
            data_dir: PathBuf::from("."),
            tick_interval_ms: 50,
            telemetry_period_ms: 1000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    database_url: Option<String>,
    data_dir: Option<PathBuf>,
    tick_interval_ms: Option<u64>,
    telemetry_period_ms: Option<u64>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("gammad.toml") {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(parse_error) => {
                tracing::warn!(%parse_error, "ignoring unparsable gammad.toml");
            }
        }
    }

    if let Ok(v) = std::env::var("GAMMAD_BIND") {
        settings.bind_addr = v;
    }
    if let Ok(v) = std::env::var("GAMMAD_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("GAMMAD_DATA_DIR") {
        settings.data_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("GAMMAD_TICK_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.tick_interval_ms = parsed;
        }
    }
    if let Ok(v) = std::env::var("GAMMAD_TELEMETRY_PERIOD_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.telemetry_period_ms = parsed;
        }
    }

    settings
}

fn apply_file_settings(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.bind_addr {
        settings.bind_addr = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.data_dir {
        settings.data_dir = v;
    }
    if let Some(v) = file_cfg.tick_interval_ms {
        settings.tick_interval_ms = v;
    }
    if let Some(v) = file_cfg.telemetry_period_ms {
        settings.telemetry_period_ms = v;
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_plain_file_path_to_sqlite_url() {
        assert_eq!(
            normalize_database_url("./data/test.db"),
            "sqlite://./data/test.db"
        );
    }

    #[test]
    fn leaves_memory_url_untouched() {
        assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[test]
    fn file_settings_override_defaults() {
        let mut settings = Settings::default();
        let file_cfg: FileSettings = toml::from_str(
            r#"
            bind_addr = "127.0.0.1:9000"
            tick_interval_ms = 100
            "#,
        )
        .expect("parse");
        apply_file_settings(&mut settings, file_cfg);

        assert_eq!(settings.bind_addr, "127.0.0.1:9000");
        assert_eq!(settings.tick_interval_ms, 100);
        assert_eq!(settings.telemetry_period_ms, 1000);
    }

    #[test]
    fn creates_parent_dir_for_relative_sqlite_url() {
        let suffix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();

        let temp_root = std::env::temp_dir().join(format!("gammad_config_test_{suffix}"));
        fs::create_dir_all(&temp_root).expect("temp root");

        let db_path = temp_root.join("data").join("test.db");
        let raw = format!("sqlite://{}", db_path.to_string_lossy());
        prepare_database_url(&raw).expect("prepare db url");
        assert!(temp_root.join("data").exists());

        fs::remove_dir_all(temp_root).expect("cleanup");
    }
}
