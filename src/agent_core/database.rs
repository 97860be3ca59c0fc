//! SQLite farm store: farm profiles and the preferences derived from them.
//!
//! Uses `rusqlite` synchronously; queries are single-row lookups keyed by
//! farm id. WAL mode is enabled so the CLI can write while a long-running
//! process reads.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::errors::AgentError;
use super::types::FarmPreferences;

// ─── Types ──────────────────────────────────────────────────────────────────

/// One row of the `farms` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FarmRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub preferred_commodities: Vec<String>,
    #[serde(default)]
    pub preferred_mandi: Option<String>,
}

impl FarmRecord {
    pub fn preferences(&self) -> FarmPreferences {
        FarmPreferences::new(
            self.preferred_commodities.clone(),
            self.preferred_mandi.clone(),
        )
    }
}

/// Source of farmer-specific defaults for a session.
#[async_trait]
pub trait PreferenceLookup: Send + Sync {
    /// Preferences for `farm_id`; no id or an unknown farm yields empty defaults.
    async fn preferences(&self, farm_id: Option<&str>) -> Result<FarmPreferences, AgentError>;
}

// ─── Database ───────────────────────────────────────────────────────────────

/// SQLite handle for farm profiles.
pub struct FarmDatabase {
    conn: Mutex<Connection>,
}

impl FarmDatabase {
    /// Open (or create) the farm database at `path`.
    pub fn open(path: &Path) -> Result<Self, AgentError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AgentError::Database {
                reason: format!("cannot create {}: {e}", parent.display()),
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Fresh in-memory database (tests, throwaway runs).
    pub fn open_in_memory() -> Result<Self, AgentError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AgentError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS farms (
                id TEXT PRIMARY KEY,
                name TEXT,
                latitude REAL,
                longitude REAL,
                district TEXT,
                state TEXT,
                preferred_commodities TEXT NOT NULL DEFAULT '[]',
                preferred_mandi TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AgentError> {
        self.conn.lock().map_err(|_| AgentError::Database {
            reason: "connection lock poisoned".into(),
        })
    }

    // ─── Farms ──────────────────────────────────────────────────────────

    /// Insert or replace a farm profile.
    pub fn upsert_farm(&self, farm: &FarmRecord) -> Result<(), AgentError> {
        let commodities = serde_json::to_string(&farm.preferred_commodities)?;
        self.conn()?.execute(
            "INSERT INTO farms
                (id, name, latitude, longitude, district, state, preferred_commodities, preferred_mandi)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                district = excluded.district,
                state = excluded.state,
                preferred_commodities = excluded.preferred_commodities,
                preferred_mandi = excluded.preferred_mandi,
                updated_at = datetime('now')",
            params![
                farm.id,
                farm.name,
                farm.latitude,
                farm.longitude,
                farm.district,
                farm.state,
                commodities,
                farm.preferred_mandi,
            ],
        )?;
        tracing::info!(farm_id = %farm.id, commodities = farm.preferred_commodities.len(), "farm saved");
        Ok(())
    }

    /// Get a farm by id.
    pub fn get_farm(&self, id: &str) -> Result<Option<FarmRecord>, AgentError> {
        let farm = self
            .conn()?
            .query_row(
                "SELECT id, name, latitude, longitude, district, state, preferred_commodities, preferred_mandi
                 FROM farms WHERE id = ?1",
                params![id],
                |row| {
                    Ok(FarmRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        latitude: row.get(2)?,
                        longitude: row.get(3)?,
                        district: row.get(4)?,
                        state: row.get(5)?,
                        preferred_commodities: parse_json_array(row.get::<_, String>(6)?),
                        preferred_mandi: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(farm)
    }
}

#[async_trait]
impl PreferenceLookup for FarmDatabase {
    async fn preferences(&self, farm_id: Option<&str>) -> Result<FarmPreferences, AgentError> {
        let Some(id) = farm_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return Ok(FarmPreferences::default());
        };
        match self.get_farm(id)? {
            Some(farm) => Ok(farm.preferences()),
            None => {
                tracing::debug!(farm_id = id, "no farm profile, using empty preferences");
                Ok(FarmPreferences::default())
            }
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Parse a JSON array of strings, tolerating malformed values.
fn parse_json_array(s: String) -> Vec<String> {
    serde_json::from_str(&s).unwrap_or_default()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> FarmDatabase {
        FarmDatabase::open_in_memory().unwrap()
    }

    fn farm() -> FarmRecord {
        FarmRecord {
            id: "farm-1".into(),
            name: Some("Ghosh farm".into()),
            latitude: Some(22.5),
            longitude: Some(88.3),
            district: Some("Kolkata".into()),
            state: Some("West Bengal".into()),
            preferred_commodities: vec!["Rice".into(), "Jute".into()],
            preferred_mandi: Some("Sealdah".into()),
        }
    }

    #[test]
    fn test_upsert_and_get_farm() {
        let db = test_db();
        db.upsert_farm(&farm()).unwrap();
        assert_eq!(db.get_farm("farm-1").unwrap(), Some(farm()));
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let db = test_db();
        db.upsert_farm(&farm()).unwrap();
        let mut updated = farm();
        updated.preferred_commodities = vec!["Potato".into()];
        updated.preferred_mandi = None;
        db.upsert_farm(&updated).unwrap();

        let got = db.get_farm("farm-1").unwrap().unwrap();
        assert_eq!(got.preferred_commodities, vec!["Potato"]);
        assert!(got.preferred_mandi.is_none());
    }

    #[test]
    fn test_farm_not_found() {
        assert!(test_db().get_farm("missing").unwrap().is_none());
    }

    #[test]
    fn test_malformed_commodity_json_reads_as_empty() {
        let db = test_db();
        db.upsert_farm(&farm()).unwrap();
        db.conn()
            .unwrap()
            .execute(
                "UPDATE farms SET preferred_commodities = 'not json' WHERE id = 'farm-1'",
                [],
            )
            .unwrap();
        assert!(db.get_farm("farm-1").unwrap().unwrap().preferred_commodities.is_empty());
    }

    #[tokio::test]
    async fn test_preferences_for_known_farm() {
        let db = test_db();
        db.upsert_farm(&farm()).unwrap();
        let prefs = db.preferences(Some("farm-1")).await.unwrap();
        assert_eq!(prefs.preferred_commodities, vec!["Rice", "Jute"]);
        assert_eq!(prefs.preferred_mandi.as_deref(), Some("Sealdah"));
    }

    #[tokio::test]
    async fn test_preferences_truncated_to_eight() {
        let db = test_db();
        let mut many = farm();
        many.preferred_commodities = (1..=11).map(|i| format!("crop{i}")).collect();
        db.upsert_farm(&many).unwrap();
        let prefs = db.preferences(Some("farm-1")).await.unwrap();
        assert_eq!(prefs.preferred_commodities.len(), 8);
        assert_eq!(prefs.preferred_commodities[7], "crop8");
    }

    #[tokio::test]
    async fn test_missing_or_unknown_farm_gives_defaults() {
        let db = test_db();
        assert!(db.preferences(None).await.unwrap().is_empty());
        assert!(db.preferences(Some("  ")).await.unwrap().is_empty());
        assert!(db.preferences(Some("nope")).await.unwrap().is_empty());
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("farms.db");
        {
            let db = FarmDatabase::open(&path).unwrap();
            db.upsert_farm(&farm()).unwrap();
        }
        let reopened = FarmDatabase::open(&path).unwrap();
        assert_eq!(reopened.get_farm("farm-1").unwrap().unwrap().district.as_deref(), Some("Kolkata"));
    }
}
