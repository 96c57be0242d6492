use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    DetectorConfig, Position, SessionArgs, SpectrumRecord, TelemetrySample, Velocity,
};

/// Append/query store for spectrum records, one SQLite database per daemon.
#[derive(Clone)]
pub struct SpectrumStore {
    pool: Pool<Sqlite>,
}

/// Handle scoped to one recording session; required for inserts so a closed
/// session can never be written to.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: i64,
    session_name: String,
}

impl SessionHandle {
    pub fn session_name(&self) -> &str {
        &self.session_name
    }
}

impl SpectrumStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                session_name TEXT NOT NULL,
                plugin_name  TEXT NOT NULL,
                livetime     REAL NOT NULL,
                args_json    TEXT NOT NULL,
                started_at   TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                closed_at    TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure sessions table exists")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS spectrums (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id      INTEGER NOT NULL,
                session_name    TEXT NOT NULL,
                spectrum_index  INTEGER NOT NULL,
                time            TEXT NOT NULL,
                latitude        REAL NOT NULL,
                latitude_error  REAL NOT NULL,
                longitude       REAL NOT NULL,
                longitude_error REAL NOT NULL,
                altitude        REAL NOT NULL,
                altitude_error  REAL NOT NULL,
                track           REAL NOT NULL,
                track_error     REAL NOT NULL,
                speed           REAL NOT NULL,
                speed_error     REAL NOT NULL,
                climb           REAL NOT NULL,
                climb_error     REAL NOT NULL,
                livetime        REAL NOT NULL,
                realtime        REAL NOT NULL,
                total_count     INTEGER NOT NULL,
                num_channels    INTEGER NOT NULL,
                channels        TEXT NOT NULL,
                UNIQUE (session_name, spectrum_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure spectrums table exists")?;

        Ok(())
    }

    /// Opens a store handle for a new recording session.
    pub async fn open_session(
        &self,
        config: &DetectorConfig,
        args: &SessionArgs,
    ) -> Result<SessionHandle> {
        let args_json = serde_json::to_string(args).unwrap_or_default();
        let rec = sqlx::query(
            "INSERT INTO sessions (session_name, plugin_name, livetime, args_json)
             VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&args.session_name)
        .bind(&config.plugin_name)
        .bind(args.livetime)
        .bind(args_json)
        .fetch_one(&self.pool)
        .await
        .context("failed to record session start")?;

        Ok(SessionHandle {
            session_id: rec.get::<i64, _>(0),
            session_name: args.session_name.clone(),
        })
    }

    pub async fn insert_spectrum(
        &self,
        handle: &SessionHandle,
        record: &SpectrumRecord,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO spectrums (
                session_id, session_name, spectrum_index, time,
                latitude, latitude_error, longitude, longitude_error,
                altitude, altitude_error, track, track_error,
                speed, speed_error, climb, climb_error,
                livetime, realtime, total_count, num_channels, channels
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(handle.session_id)
        .bind(&record.session_name)
        .bind(record.index)
        .bind(record.telemetry.time)
        .bind(record.telemetry.position.latitude)
        .bind(record.telemetry.position.latitude_error)
        .bind(record.telemetry.position.longitude)
        .bind(record.telemetry.position.longitude_error)
        .bind(record.telemetry.position.altitude)
        .bind(record.telemetry.position.altitude_error)
        .bind(record.telemetry.velocity.track)
        .bind(record.telemetry.velocity.track_error)
        .bind(record.telemetry.velocity.speed)
        .bind(record.telemetry.velocity.speed_error)
        .bind(record.telemetry.velocity.climb)
        .bind(record.telemetry.velocity.climb_error)
        .bind(record.livetime)
        .bind(record.realtime)
        .bind(record.total_count as i64)
        .bind(record.num_channels as i64)
        .bind(encode_channels(&record.channels))
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "failed to insert spectrum {} for session '{}'",
                record.index, record.session_name
            )
        })?;
        Ok(())
    }

    /// Returns the stored records for `session_name` with index >= `min_index`
    /// and not in `excluded`, ascending by index.
    pub async fn query_spectra(
        &self,
        session_name: &str,
        excluded: &[i64],
        min_index: i64,
    ) -> Result<Vec<SpectrumRecord>> {
        let rows = sqlx::query(
            "SELECT session_name, spectrum_index, time,
                    latitude, latitude_error, longitude, longitude_error,
                    altitude, altitude_error, track, track_error,
                    speed, speed_error, climb, climb_error,
                    livetime, realtime, total_count, num_channels, channels
             FROM spectrums
             WHERE session_name = ? AND spectrum_index >= ?
             ORDER BY spectrum_index ASC",
        )
        .bind(session_name)
        .bind(min_index)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to query spectra for session '{session_name}'"))?;

        let mut records = Vec::with_capacity(rows.len());
        for r in rows {
            let index = r.get::<i64, _>(1);
            if excluded.contains(&index) {
                continue;
            }
            records.push(SpectrumRecord {
                session_name: r.get::<String, _>(0),
                index,
                telemetry: TelemetrySample {
                    position: Position {
                        latitude: r.get::<f64, _>(3),
                        latitude_error: r.get::<f64, _>(4),
                        longitude: r.get::<f64, _>(5),
                        longitude_error: r.get::<f64, _>(6),
                        altitude: r.get::<f64, _>(7),
                        altitude_error: r.get::<f64, _>(8),
                    },
                    velocity: Velocity {
                        track: r.get::<f64, _>(9),
                        track_error: r.get::<f64, _>(10),
                        speed: r.get::<f64, _>(11),
                        speed_error: r.get::<f64, _>(12),
                        climb: r.get::<f64, _>(13),
                        climb_error: r.get::<f64, _>(14),
                    },
                    time: r.get::<DateTime<Utc>, _>(2),
                },
                livetime: r.get::<f64, _>(15),
                realtime: r.get::<f64, _>(16),
                total_count: r.get::<i64, _>(17) as u64,
                num_channels: r.get::<i64, _>(18) as u32,
                channels: decode_channels(&r.get::<String, _>(19)),
            });
        }
        Ok(records)
    }

    /// Marks the session closed. Best-effort at teardown; the caller decides
    /// whether a failure here matters.
    pub async fn close_session(&self, handle: SessionHandle) -> Result<()> {
        sqlx::query("UPDATE sessions SET closed_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(handle.session_id)
            .execute(&self.pool)
            .await
            .with_context(|| {
                format!("failed to close session '{}'", handle.session_name)
            })?;
        Ok(())
    }
}

fn encode_channels(channels: &[u32]) -> String {
    let mut encoded = String::with_capacity(channels.len() * 4);
    for (i, count) in channels.iter().enumerate() {
        if i > 0 {
            encoded.push(' ');
        }
        encoded.push_str(&count.to_string());
    }
    encoded
}

fn decode_channels(encoded: &str) -> Vec<u32> {
    encoded
        .split_ascii_whitespace()
        .filter_map(|c| c.parse::<u32>().ok())
        .collect()
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
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
#[path = "tests/lib_tests.rs"]
mod tests;
