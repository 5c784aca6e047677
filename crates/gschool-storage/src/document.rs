use anyhow::{Context, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::models::PolicyDocument;

/// File-backed store for the policy document (`data.json`)
///
/// Every read-modify-write inside this process goes through `update`, which
/// holds the store lock for the whole cycle. Across processes the last writer wins.
pub struct PolicyStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PolicyStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document. Never fails: missing or corrupt files fall back to a
    /// repaired or default document, which is written back.
    #[must_use]
    pub fn load(&self) -> PolicyDocument {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_unlocked()
    }

    /// Write the document as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot be written
    pub fn save(&self, doc: &PolicyDocument) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.save_unlocked(doc)
    }

    /// Atomic (in-process) load, mutate, save
    ///
    /// # Errors
    ///
    /// Returns an error from the closure, or if saving fails
    pub fn update<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut PolicyDocument) -> Result<T>,
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut doc = self.load_unlocked();
        let out = mutate(&mut doc)?;
        self.save_unlocked(&doc)?;
        Ok(out)
    }

    fn load_unlocked(&self) -> PolicyDocument {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Could not read {}: {e}", self.path.display());
                }
                return self.write_back(PolicyDocument::default(), "created default");
            }
        };

        match serde_json::from_str::<PolicyDocument>(&raw) {
            Ok(mut doc) => {
                doc.ensure_defaults();
                doc
            }
            Err(e) => {
                log::warn!("Policy document {} is corrupt: {e}", self.path.display());
                let doc = repair_document(&raw).unwrap_or_default();
                self.write_back(doc, "repaired")
            }
        }
    }

    fn write_back(&self, mut doc: PolicyDocument, what: &str) -> PolicyDocument {
        doc.ensure_defaults();
        match self.save_unlocked(&doc) {
            Ok(()) => log::info!("Policy document {what}: {}", self.path.display()),
            Err(e) => log::warn!("Failed to write policy document: {e:#}"),
        }
        doc
    }

    fn save_unlocked(&self, doc: &PolicyDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
        }
        let body = serde_json::to_string_pretty(doc).context("Failed to encode policy document")?;
        std::fs::write(&self.path, body)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// Salvage what can be read from a corrupt document.
///
/// The text is parsed as one JSON value, or failing that as concatenated
/// objects (`{..}{..}`) stitched into an array. Each top-level key is then
/// merged over the default document on its own; keys whose value does not
/// fit their field keep the default and are logged.
fn repair_document(raw: &str) -> Option<PolicyDocument> {
    let fragments = match serde_json::from_str::<Value>(raw) {
        Ok(value) => vec![value],
        Err(_) => {
            let seam = Regex::new(r"\}\s*\{").ok()?;
            let stitched = format!("[{}]", seam.replace_all(raw.trim(), "},{"));
            serde_json::from_str::<Vec<Value>>(&stitched).ok()?
        }
    };

    let mut merged = match serde_json::to_value(PolicyDocument::default()).ok()? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for fragment in fragments {
        let Value::Object(map) = fragment else {
            log::warn!("Ignoring non-object fragment in policy document");
            continue;
        };
        for (key, value) in map {
            let key = if key == "announcements" {
                String::from("announcement")
            } else {
                key
            };
            let mut candidate = merged.clone();
            candidate.insert(key.clone(), value);
            match serde_json::from_value::<PolicyDocument>(Value::Object(candidate.clone())) {
                Ok(_) => merged = candidate,
                Err(e) => log::warn!("Dropping unreadable policy field '{key}': {e}"),
            }
        }
    }
    serde_json::from_value(Value::Object(merged)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditEntry, DEFAULT_CLASS_ID};

    fn store_in(dir: &tempfile::TempDir) -> PolicyStore {
        PolicyStore::new(dir.path().join("data.json"))
    }

    #[test]
    fn test_missing_file_yields_default_and_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let doc = store.load();
        assert!(doc.extension_enabled);
        assert!(doc.classes.contains_key(DEFAULT_CLASS_ID));
        assert!(store.path().exists());
    }

    #[test]
    fn test_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .update(|doc| {
                doc.announcement = "Test Friday".to_string();
                doc.default_class_mut().focus_mode = true;
                Ok(())
            })
            .unwrap();

        let doc = store.load();
        assert_eq!(doc.announcement, "Test Friday");
        assert!(doc.default_class().focus_mode);
    }

    #[test]
    fn test_update_error_does_not_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let result: Result<()> = store.update(|doc| {
            doc.announcement = "never saved".to_string();
            anyhow::bail!("rejected")
        });
        assert!(result.is_err());
        assert!(store.load().announcement.is_empty());
    }

    #[test]
    fn test_concatenated_objects_are_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            r#"{"announcement": "first"}
               {"extension_enabled": false}"#,
        )
        .unwrap();

        let doc = store.load();
        assert_eq!(doc.announcement, "first");
        assert!(!doc.extension_enabled);
        assert!(doc.classes.contains_key(DEFAULT_CLASS_ID));

        // Repaired form was written back as valid JSON
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(serde_json::from_str::<PolicyDocument>(&raw).is_ok());
    }

    #[test]
    fn test_garbage_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{{{ not json").unwrap();

        let doc = store.load();
        assert_eq!(doc, PolicyDocument::default());
    }

    #[test]
    fn test_type_drift_keeps_readable_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            r#"{
                "announcement": null,
                "settings": {"chat_enabled": "yes"},
                "classes": {"chem3": {"name": "Chem", "focus_mode": true}},
                "student_overrides": {"alice": {"focus_mode": true}},
                "extension_enabled": false
            }"#,
        )
        .unwrap();

        let doc = store.load();
        assert!(doc.announcement.is_empty());
        assert!(!doc.settings.chat_enabled);
        assert!(!doc.extension_enabled);
        let chem = &doc.classes["chem3"];
        assert_eq!(chem.name, "Chem");
        assert!(chem.focus_mode);
        assert!(doc.classes.contains_key(DEFAULT_CLASS_ID));
        assert_eq!(doc.student_overrides["alice"].focus_mode, Some(true));

        // The salvaged fields were written back, not the default
        let on_disk: PolicyDocument =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert!(on_disk.classes.contains_key("chem3"));
        assert_eq!(on_disk.student_overrides["alice"].focus_mode, Some(true));
    }

    #[test]
    fn test_wrong_shape_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), r#"["not", "a", "document"]"#).unwrap();
        assert_eq!(store.load(), PolicyDocument::default());

        std::fs::write(store.path(), "42").unwrap();
        assert_eq!(store.load(), PolicyDocument::default());
    }

    #[test]
    fn test_concatenated_fragments_with_drift() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            r#"{"announcements": "legacy", "exam": "on"}{"overrides": {"allowlist": ["desmos.com"]}}"#,
        )
        .unwrap();

        let doc = store.load();
        assert_eq!(doc.announcement, "legacy");
        assert!(!doc.exam.active);
        assert_eq!(doc.overrides.allowlist, vec!["desmos.com".to_string()]);
    }

    #[test]
    fn test_partial_document_gets_default_class() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), r#"{"classes": {}, "audit": []}"#).unwrap();
        let doc = store.load();
        assert_eq!(doc.default_class().name, "Period 1");
    }

    #[test]
    fn test_audit_survives_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .update(|doc| {
                doc.record_audit(AuditEntry::new("announce", 42).with("text", "hello"));
                Ok(())
            })
            .unwrap();
        let doc = store.load();
        assert_eq!(doc.audit.len(), 1);
        assert_eq!(doc.audit[0].event, "announce");
        assert_eq!(doc.audit[0].detail["text"], "hello");
    }
}
