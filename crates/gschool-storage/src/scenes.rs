use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use crate::models::{Scene, SceneKind, SceneRef};

/// Canonical scene file: `{"scenes": [...], "current": {id, name, type} | null}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneFile {
    pub scenes: Vec<Scene>,
    pub current: Option<SceneRef>,
}

impl SceneFile {
    /// Accept the canonical shape as well as the legacy bucketed one
    /// (`{"allowed": [...], "blocked": [...]}`, scenes tagged with `bucket`).
    ///
    /// Unusable entries are dropped; duplicate ids keep the first occurrence.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };

        let mut scenes = Vec::new();
        let mut seen = HashSet::new();
        let sources = [
            ("scenes", None),
            ("allowed", Some(SceneKind::Allowed)),
            ("blocked", Some(SceneKind::Blocked)),
        ];
        for (key, bucket) in sources {
            let Some(items) = obj.get(key).and_then(Value::as_array) else {
                continue;
            };
            for item in items {
                if let Some(scene) = normalize_scene(item, bucket) {
                    if seen.insert(scene.id.clone()) {
                        scenes.push(scene);
                    }
                }
            }
        }

        let mut file = Self {
            scenes,
            current: None,
        };
        file.current = obj
            .get("current")
            .and_then(|current| file.normalize_current(current));
        file
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|scene| scene.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Scene> {
        self.scenes.iter_mut().find(|scene| scene.id == id)
    }

    /// The scene the current pointer refers to; a dangling pointer yields `None`
    #[must_use]
    pub fn current_scene(&self) -> Option<&Scene> {
        self.current.as_ref().and_then(|current| self.find(&current.id))
    }

    /// Remove a scene, clearing the current pointer if it referred to it
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.scenes.len();
        self.scenes.retain(|scene| scene.id != id);
        if self.current.as_ref().is_some_and(|current| current.id == id) {
            self.current = None;
        }
        self.scenes.len() != before
    }

    fn normalize_current(&self, value: &Value) -> Option<SceneRef> {
        let obj = value.as_object()?;
        let id = id_of(obj.get("id")?)?;
        if let Some(scene) = self.find(&id) {
            return Some(scene.to_ref());
        }
        Some(SceneRef {
            id,
            name: obj
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            kind: obj
                .get("type")
                .and_then(Value::as_str)
                .and_then(SceneKind::parse_kind)
                .unwrap_or(SceneKind::Blocked),
        })
    }
}

fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Lenient single-scene normalization used for loading and importing
#[must_use]
pub fn normalize_scene(value: &Value, bucket: Option<SceneKind>) -> Option<Scene> {
    let obj = value.as_object()?;
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .and_then(SceneKind::parse_kind)
        .or_else(|| {
            obj.get("bucket")
                .and_then(Value::as_str)
                .and_then(SceneKind::parse_kind)
        })
        .or(bucket)
        .unwrap_or(SceneKind::Blocked);

    Some(Scene {
        id: obj
            .get("id")
            .and_then(id_of)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: obj
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("Untitled scene")
            .to_string(),
        kind,
        allow: string_list(obj, "allow"),
        block: string_list(obj, "block"),
        icon: obj
            .get("icon")
            .and_then(Value::as_str)
            .filter(|icon| !icon.is_empty())
            .unwrap_or("blue")
            .to_string(),
    })
}

/// File-backed scene store (`scenes.json`)
pub struct SceneStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SceneStore {
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

    /// Load and normalize. Missing or unreadable files yield an empty store; a
    /// file that needed normalizing is written back in canonical form.
    #[must_use]
    pub fn load(&self) -> SceneFile {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_unlocked()
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be written
    pub fn save(&self, file: &SceneFile) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.save_unlocked(file)
    }

    /// Load, mutate and save under the store lock
    ///
    /// # Errors
    ///
    /// Returns an error from the closure, or if saving fails
    pub fn update<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut SceneFile) -> Result<T>,
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.load_unlocked();
        let out = mutate(&mut file)?;
        self.save_unlocked(&file)?;
        Ok(out)
    }

    fn load_unlocked(&self) -> SceneFile {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Could not read {}: {e}", self.path.display());
                }
                return SceneFile::default();
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => {
                let file = SceneFile::from_value(&value);
                // Generated ids and legacy shapes must survive the next load
                if serde_json::to_value(&file).ok().as_ref() != Some(&value) {
                    match self.save_unlocked(&file) {
                        Ok(()) => log::info!("Scene file normalized: {}", self.path.display()),
                        Err(e) => log::warn!("Failed to write normalized scenes: {e:#}"),
                    }
                }
                file
            }
            Err(e) => {
                log::warn!("Scene file {} is corrupt: {e}", self.path.display());
                SceneFile::default()
            }
        }
    }

    fn save_unlocked(&self, file: &SceneFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
        }
        let body = serde_json::to_string_pretty(file).context("Failed to encode scenes")?;
        std::fs::write(&self.path, body)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_bucketed_shape_is_normalized() {
        let legacy = json!({
            "allowed": [{"id": 1700000000000_u64, "name": "Math", "allow": ["desmos.com"]}],
            "blocked": [{"id": "b1", "name": "No games", "type": "blocked", "block": ["roblox.com"]}],
            "current": {"id": "1700000000000", "name": "Math", "type": "allowed"}
        });
        let file = SceneFile::from_value(&legacy);

        assert_eq!(file.scenes.len(), 2);
        let math = file.find("1700000000000").unwrap();
        assert_eq!(math.kind, SceneKind::Allowed);
        assert_eq!(math.allow, vec!["desmos.com".to_string()]);
        assert_eq!(math.icon, "blue");
        assert_eq!(file.current_scene().unwrap().name, "Math");
    }

    #[test]
    fn test_bucket_field_sets_type() {
        let file = SceneFile::from_value(&json!({
            "scenes": [{"id": "x", "name": "Reading", "bucket": "allowed"}]
        }));
        assert_eq!(file.scenes[0].kind, SceneKind::Allowed);
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let file = SceneFile::from_value(&json!({
            "scenes": [{"id": "a", "name": "First"}],
            "blocked": [{"id": "a", "name": "Second"}]
        }));
        assert_eq!(file.scenes.len(), 1);
        assert_eq!(file.scenes[0].name, "First");
    }

    #[test]
    fn test_dangling_current_is_kept_but_resolves_to_none() {
        let file = SceneFile::from_value(&json!({
            "scenes": [],
            "current": {"id": "gone", "name": "Old", "type": "allowed"}
        }));
        assert_eq!(file.current.as_ref().unwrap().id, "gone");
        assert!(file.current_scene().is_none());
    }

    #[test]
    fn test_remove_clears_current() {
        let mut file = SceneFile::default();
        let scene = Scene::new("Quiz", SceneKind::Allowed);
        file.current = Some(scene.to_ref());
        let id = scene.id.clone();
        file.scenes.push(scene);

        assert!(file.remove(&id));
        assert!(file.current.is_none());
        assert!(!file.remove(&id));
    }

    #[test]
    fn test_store_roundtrip_writes_canonical_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = SceneStore::new(dir.path().join("scenes.json"));
        assert!(store.load().scenes.is_empty());

        store
            .update(|file| {
                file.scenes.push(Scene::new("Lab", SceneKind::Blocked));
                Ok(())
            })
            .unwrap();

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["scenes"][0]["type"], "blocked");
        assert!(raw["current"].is_null());
        assert_eq!(store.load().scenes[0].name, "Lab");
    }

    #[test]
    fn test_generated_ids_are_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = SceneStore::new(dir.path().join("scenes.json"));
        std::fs::write(
            store.path(),
            r#"{"allowed": [{"name": "Math", "allow": ["desmos.com"]}]}"#,
        )
        .unwrap();

        let first = store.load();
        let id = first.scenes[0].id.clone();
        assert!(!id.is_empty());
        assert_eq!(store.load().scenes[0].id, id);
        assert!(store.load().find(&id).is_some());

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["scenes"][0]["id"], id.as_str());
        assert!(raw.get("allowed").is_none());
    }

    #[test]
    fn test_corrupt_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SceneStore::new(dir.path().join("scenes.json"));
        std::fs::write(store.path(), "[[[").unwrap();
        assert_eq!(store.load(), SceneFile::default());
    }
}
