use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::migrations;
use crate::models::{Category, CategoryPatch, Schedule};

/// Database connection wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database and seed the category table
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation, connection opening, or schema initialization fails
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = db_path.unwrap_or_else(Self::default_db_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path).context("Failed to open database connection")?;
        let db = Self::from_connection(conn)?;

        log::info!("Database initialized at: {}", path.display());
        Ok(db)
    }

    /// In-memory database, used by tests and dry runs
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::init_schema(&conn)?;
        migrations::insert_default_categories(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn default_db_path() -> PathBuf {
        let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("gschool");
        path.push("gschool.db");
        path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- settings KV ----

    /// Raw stored text for a settings key
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub fn get_setting_raw(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row("SELECT v FROM settings WHERE k = ?1", params![key], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(value.flatten())
    }

    /// Read a setting, decoding JSON. Legacy plain-text values are tried as a JSON string.
    ///
    /// Missing or undecodable values yield `default`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub fn get_setting<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        let Some(raw) = self.get_setting_raw(key)? else {
            return Ok(default);
        };
        if let Ok(parsed) = serde_json::from_str::<T>(&raw) {
            return Ok(parsed);
        }
        Ok(serde_json::from_value::<T>(Value::String(raw)).unwrap_or(default))
    }

    /// Store a setting as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails
    pub fn set_setting<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_string(value).context("Failed to encode setting")?;
        self.conn().execute(
            "INSERT OR REPLACE INTO settings (k, v) VALUES (?1, ?2)",
            params![key, encoded],
        )?;
        Ok(())
    }

    // ---- categories ----

    /// All categories with their schedules, ordered by name
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.name, c.blocked, c.block_url, s.schedule_json
             FROM categories c
             LEFT JOIN category_schedules s ON s.name = c.name
             ORDER BY c.name",
        )?;
        let categories = stmt
            .query_map([], row_to_category)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    /// One category by exact name
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub fn get_category(&self, name: &str) -> Result<Option<Category>> {
        let category = self
            .conn()
            .query_row(
                "SELECT c.name, c.blocked, c.block_url, s.schedule_json
                 FROM categories c
                 LEFT JOIN category_schedules s ON s.name = c.name
                 WHERE c.name = ?1",
                params![name],
                row_to_category,
            )
            .optional()?;
        Ok(category)
    }

    /// Apply a partial category update. Only fields present in the patch change.
    ///
    /// Unknown names get a row created first.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; the update is applied in one transaction
    pub fn update_category(&self, patch: &CategoryPatch) -> Result<Category> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO categories (name, blocked, block_url) VALUES (?1, 0, NULL)",
            params![patch.name],
        )?;
        if let Some(blocked) = patch.blocked {
            tx.execute(
                "UPDATE categories SET blocked = ?1 WHERE name = ?2",
                params![i32::from(blocked), patch.name],
            )?;
        }
        if let Some(block_url) = &patch.block_url {
            tx.execute(
                "UPDATE categories SET block_url = ?1 WHERE name = ?2",
                params![block_url, patch.name],
            )?;
        }
        if let Some(schedule) = &patch.schedule {
            tx.execute(
                "INSERT OR REPLACE INTO category_schedules (name, schedule_json) VALUES (?1, ?2)",
                params![patch.name, serde_json::to_string(schedule)?],
            )?;
        }

        let category = tx.query_row(
            "SELECT c.name, c.blocked, c.block_url, s.schedule_json
             FROM categories c
             LEFT JOIN category_schedules s ON s.name = c.name
             WHERE c.name = ?1",
            params![patch.name],
            row_to_category,
        )?;
        tx.commit()?;

        log::info!(
            "Category updated: {} (blocked: {}, schedule: {})",
            category.name,
            category.blocked,
            category.schedule.is_some()
        );
        Ok(category)
    }

    /// Drop a category's schedule so its static flag applies again
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails
    pub fn clear_category_schedule(&self, name: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM category_schedules WHERE name = ?1",
            params![name],
        )?;
        Ok(())
    }
}

fn row_to_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<Category> {
    let raw_schedule: Option<String> = row.get(3)?;
    Ok(Category {
        name: row.get(0)?,
        blocked: row.get::<_, Option<i64>>(1)?.unwrap_or(0) != 0,
        block_url: row.get(2)?,
        schedule: raw_schedule.as_deref().and_then(Schedule::from_json),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_categories_seeded_and_ordered() {
        let db = Database::open_in_memory().unwrap();
        let categories = db.list_categories().unwrap();
        assert_eq!(categories.len(), 23);
        assert_eq!(categories[0].name, "AI Chatbots & Tools");
        assert!(categories.iter().all(|c| !c.blocked && c.schedule.is_none()));
    }

    #[test]
    fn test_database_file_created_in_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gschool.db");
        let db = Database::new(Some(path.clone())).unwrap();
        assert!(path.exists());
        assert!(db.get_category("Games").unwrap().is_some());
    }

    #[test]
    fn test_update_category_only_touches_present_fields() {
        let db = Database::open_in_memory().unwrap();
        db.update_category(&CategoryPatch {
            name: "Games".to_string(),
            blocked: Some(true),
            block_url: Some(Some("https://block.example/games".to_string())),
            schedule: None,
        })
        .unwrap();

        let updated = db
            .update_category(&CategoryPatch {
                name: "Games".to_string(),
                schedule: Some(json!({"enabled": true, "start": "08:00", "end": "15:00"})),
                ..CategoryPatch::default()
            })
            .unwrap();

        assert!(updated.blocked);
        assert_eq!(updated.block_url.as_deref(), Some("https://block.example/games"));
        let schedule = updated.schedule.unwrap();
        assert!(schedule.enabled);
        assert_eq!(schedule.start.as_deref(), Some("08:00"));
    }

    #[test]
    fn test_update_category_clears_block_url_with_explicit_null() {
        let db = Database::open_in_memory().unwrap();
        db.update_category(&CategoryPatch {
            name: "Games".to_string(),
            block_url: Some(Some("https://x".to_string())),
            ..CategoryPatch::default()
        })
        .unwrap();
        let updated = db
            .update_category(&CategoryPatch {
                name: "Games".to_string(),
                block_url: Some(None),
                ..CategoryPatch::default()
            })
            .unwrap();
        assert!(updated.block_url.is_none());
    }

    #[test]
    fn test_update_unknown_category_creates_row() {
        let db = Database::open_in_memory().unwrap();
        let created = db
            .update_category(&CategoryPatch {
                name: "Homework Help".to_string(),
                blocked: Some(true),
                ..CategoryPatch::default()
            })
            .unwrap();
        assert!(created.blocked);
        assert_eq!(db.list_categories().unwrap().len(), 24);
    }

    #[test]
    fn test_malformed_schedule_reads_as_none() {
        let db = Database::open_in_memory().unwrap();
        db.update_category(&CategoryPatch {
            name: "Games".to_string(),
            schedule: Some(json!("every day")),
            ..CategoryPatch::default()
        })
        .unwrap();
        assert!(db.get_category("Games").unwrap().unwrap().schedule.is_none());

        db.update_category(&CategoryPatch {
            name: "Games".to_string(),
            schedule: Some(json!({"enabled": true})),
            ..CategoryPatch::default()
        })
        .unwrap();
        db.clear_category_schedule("Games").unwrap();
        assert!(db.get_category("Games").unwrap().unwrap().schedule.is_none());
    }

    #[test]
    fn test_settings_roundtrip_and_defaults() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.get_setting("yt_allow_mode", false).unwrap());

        db.set_setting("yt_block_keywords", &vec!["minecraft".to_string()])
            .unwrap();
        let keywords: Vec<String> = db.get_setting("yt_block_keywords", Vec::new()).unwrap();
        assert_eq!(keywords, vec!["minecraft".to_string()]);
    }

    #[test]
    fn test_legacy_plain_text_setting() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute(
                "INSERT INTO settings (k, v) VALUES ('passcode', 'letmein')",
                [],
            )
            .unwrap();
        let passcode: String = db.get_setting("passcode", String::new()).unwrap();
        assert_eq!(passcode, "letmein");

        // Not decodable as the requested type either way
        let number: i64 = db.get_setting("passcode", 7).unwrap();
        assert_eq!(number, 7);
    }
}
