use anyhow::Result;
use gschool_storage::{
    normalize_scene, AuditEntry, PendingCommand, PolicyStore, Scene, SceneFile, SceneKind,
    SceneRef, SceneStore, BROADCAST_TARGET,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::PolicyError;
use crate::unix_now;

/// Fields for a new scene
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewScene {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub allow: Vec<String>,
    pub block: Vec<String>,
    pub icon: Option<String>,
}

/// Partial scene update; absent fields are kept
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SceneUpdate {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub allow: Option<Vec<String>>,
    pub block: Option<Vec<String>>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneExport {
    Scene(Scene),
    Scenes(SceneFile),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneImport {
    /// A single scene was added (or replaced by id)
    Scene(String),
    /// The whole store was replaced
    Scenes(usize),
}

fn parse_kind(raw: &str) -> Result<SceneKind, PolicyError> {
    SceneKind::parse_kind(raw).ok_or_else(|| PolicyError::InvalidSceneType(raw.to_string()))
}

/// Scene lifecycle: create, edit, apply, clear, import and export
pub struct SceneManager {
    scenes: Arc<SceneStore>,
    store: Arc<PolicyStore>,
}

impl SceneManager {
    #[must_use]
    pub fn new(scenes: Arc<SceneStore>, store: Arc<PolicyStore>) -> Self {
        Self { scenes, store }
    }

    #[must_use]
    pub fn list(&self) -> SceneFile {
        self.scenes.load()
    }

    /// # Errors
    ///
    /// Returns `PolicyError` for a missing name or invalid type, or a storage error
    pub fn create(&self, new: NewScene) -> Result<Scene> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(PolicyError::MissingField("name").into());
        }
        let mut scene = Scene::new(name, parse_kind(&new.kind)?);
        scene.allow = new.allow;
        scene.block = new.block;
        if let Some(icon) = new.icon.filter(|i| !i.trim().is_empty()) {
            scene.icon = icon;
        }

        let created = scene.clone();
        self.scenes.update(|file| {
            file.scenes.push(scene);
            Ok(())
        })?;

        log::info!("Scene created: {} ({})", created.name, created.kind);
        self.record(
            AuditEntry::new("scene_create", unix_now())
                .with("id", created.id.as_str())
                .with("name", created.name.as_str()),
            false,
        )?;
        Ok(created)
    }

    /// Merge `update` into a scene. Editing the current scene refreshes clients.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError` if the scene is unknown or the type is invalid
    pub fn update(&self, id: &str, update: SceneUpdate) -> Result<Scene> {
        let kind = update.kind.as_deref().map(parse_kind).transpose()?;
        let (updated, was_current) = self.scenes.update(|file| {
            let scene = file
                .find_mut(id)
                .ok_or_else(|| PolicyError::SceneNotFound(id.to_string()))?;
            if let Some(name) = update.name.filter(|n| !n.trim().is_empty()) {
                scene.name = name.trim().to_string();
            }
            if let Some(kind) = kind {
                scene.kind = kind;
            }
            if let Some(allow) = update.allow {
                scene.allow = allow;
            }
            if let Some(block) = update.block {
                scene.block = block;
            }
            if let Some(icon) = update.icon.filter(|i| !i.trim().is_empty()) {
                scene.icon = icon;
            }
            let updated = scene.clone();

            let was_current = file.current.as_ref().is_some_and(|c| c.id == id);
            if was_current {
                file.current = Some(updated.to_ref());
            }
            Ok((updated, was_current))
        })?;

        self.record(
            AuditEntry::new("scene_update", unix_now()).with("id", id),
            was_current,
        )?;
        Ok(updated)
    }

    /// Delete a scene; clears the current pointer if it referred to it
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::SceneNotFound` for unknown ids
    pub fn delete(&self, id: &str) -> Result<()> {
        let was_current = self.scenes.update(|file| {
            let was_current = file.current.as_ref().is_some_and(|c| c.id == id);
            if !file.remove(id) {
                return Err(PolicyError::SceneNotFound(id.to_string()).into());
            }
            Ok(was_current)
        })?;

        log::info!("Scene deleted: {id}");
        self.record(
            AuditEntry::new("scene_delete", unix_now()).with("id", id),
            was_current,
        )
    }

    /// Make a scene current and tell every client to refresh
    ///
    /// # Errors
    ///
    /// Returns `PolicyError` for an empty or unknown id
    pub fn apply(&self, id: &str) -> Result<SceneRef> {
        let id = id.trim();
        if id.is_empty() {
            return Err(PolicyError::MissingField("scene_id").into());
        }
        let current = self.scenes.update(|file| {
            let current = file
                .find(id)
                .map(Scene::to_ref)
                .ok_or_else(|| PolicyError::SceneNotFound(id.to_string()))?;
            file.current = Some(current.clone());
            Ok(current)
        })?;

        log::info!("Scene applied: {} ({})", current.name, current.kind);
        self.record(
            AuditEntry::new("scene_applied", unix_now())
                .with("id", current.id.as_str())
                .with("name", current.name.as_str()),
            true,
        )?;
        Ok(current)
    }

    /// Clear the current scene and tell every client to refresh
    ///
    /// # Errors
    ///
    /// Returns an error if either store cannot be saved
    pub fn clear(&self) -> Result<()> {
        self.scenes.update(|file| {
            file.current = None;
            Ok(())
        })?;
        log::info!("Scene cleared");
        self.record(AuditEntry::new("scene_clear", unix_now()), true)
    }

    /// One scene by id, or the whole store
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::SceneNotFound` for unknown ids
    pub fn export(&self, id: Option<&str>) -> Result<SceneExport> {
        let file = self.scenes.load();
        match id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => file
                .find(id)
                .cloned()
                .map(SceneExport::Scene)
                .ok_or_else(|| PolicyError::SceneNotFound(id.to_string()).into()),
            None => Ok(SceneExport::Scenes(file)),
        }
    }

    /// Import `{"scene": {...}}` (added, replacing any scene with the same id)
    /// or `{"scenes": {...}}` (replaces the whole store).
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::InvalidImport` for any other payload
    pub fn import(&self, payload: &Value) -> Result<SceneImport> {
        if let Some(raw) = payload.get("scene") {
            let bucket = match raw.get("type").and_then(Value::as_str) {
                Some("allowed") => SceneKind::Allowed,
                _ => SceneKind::Blocked,
            };
            let mut scene = normalize_scene(raw, Some(bucket)).ok_or(PolicyError::InvalidImport)?;
            scene.kind = bucket;
            let id = scene.id.clone();
            self.scenes.update(|file| {
                file.scenes.retain(|s| s.id != scene.id);
                file.scenes.push(scene);
                Ok(())
            })?;
            log::info!("Scene imported: {id}");
            self.record(AuditEntry::new("scene_import", unix_now()).with("id", id.as_str()), false)?;
            return Ok(SceneImport::Scene(id));
        }

        if let Some(raw) = payload.get("scenes") {
            let file = SceneFile::from_value(raw);
            let count = file.scenes.len();
            self.scenes.save(&file)?;
            log::info!("Scene store replaced by import ({count} scenes)");
            self.record(
                AuditEntry::new("scene_import", unix_now()).with("count", count),
                true,
            )?;
            return Ok(SceneImport::Scenes(count));
        }

        Err(PolicyError::InvalidImport.into())
    }

    fn record(&self, entry: AuditEntry, refresh: bool) -> Result<()> {
        let now = entry.ts;
        self.store.update(|doc| {
            if refresh {
                doc.commands
                    .push(BROADCAST_TARGET, PendingCommand::policy_refresh(), now);
            }
            doc.record_audit(entry);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> (tempfile::TempDir, Arc<PolicyStore>, SceneManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PolicyStore::new(dir.path().join("data.json")));
        let scenes = Arc::new(SceneStore::new(dir.path().join("scenes.json")));
        let manager = SceneManager::new(scenes, store.clone());
        (dir, store, manager)
    }

    fn new_scene(name: &str, kind: &str) -> NewScene {
        NewScene {
            name: name.to_string(),
            kind: kind.to_string(),
            ..NewScene::default()
        }
    }

    fn refreshes_for(store: &PolicyStore, student: &str) -> usize {
        let now = unix_now();
        store
            .update(|doc| Ok(doc.commands.take_all(student, now)))
            .unwrap()
            .iter()
            .filter(|c| c.kind == "policy_refresh")
            .count()
    }

    #[test]
    fn test_create_validates_name_and_type() {
        let (_dir, _store, manager) = manager();
        let err = manager.create(new_scene("  ", "allowed")).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PolicyError>(),
            Some(&PolicyError::MissingField("name"))
        );

        let err = manager.create(new_scene("Math", "focus")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PolicyError>(),
            Some(PolicyError::InvalidSceneType(_))
        ));

        let scene = manager.create(new_scene("Math", "allowed")).unwrap();
        assert_eq!(scene.kind, SceneKind::Allowed);
        assert_eq!(scene.icon, "blue");
        assert_eq!(manager.list().scenes.len(), 1);
    }

    #[test]
    fn test_apply_sets_current_and_refreshes() {
        let (_dir, store, manager) = manager();
        let scene = manager.create(new_scene("Reading", "blocked")).unwrap();

        let current = manager.apply(&scene.id).unwrap();
        assert_eq!(current.id, scene.id);
        assert_eq!(manager.list().current, Some(scene.to_ref()));
        assert_eq!(refreshes_for(&store, "alice"), 1);
    }

    #[test]
    fn test_apply_unknown_scene() {
        let (_dir, _store, manager) = manager();
        let err = manager.apply("missing").unwrap_err();
        assert_eq!(
            err.downcast_ref::<PolicyError>(),
            Some(&PolicyError::SceneNotFound("missing".to_string()))
        );
        assert!(manager.apply("").is_err());
    }

    #[test]
    fn test_clear_refreshes() {
        let (_dir, store, manager) = manager();
        let scene = manager.create(new_scene("Reading", "blocked")).unwrap();
        manager.apply(&scene.id).unwrap();
        refreshes_for(&store, "alice");

        manager.clear().unwrap();
        assert!(manager.list().current.is_none());
        assert_eq!(refreshes_for(&store, "alice"), 1);
    }

    #[test]
    fn test_update_merges_and_tracks_current() {
        let (_dir, _store, manager) = manager();
        let mut new = new_scene("Lab", "blocked");
        new.block = vec!["roblox.com".to_string()];
        let scene = manager.create(new).unwrap();
        manager.apply(&scene.id).unwrap();

        let updated = manager
            .update(
                &scene.id,
                SceneUpdate {
                    name: Some("Chem Lab".to_string()),
                    ..SceneUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Chem Lab");
        assert_eq!(updated.block, vec!["roblox.com".to_string()]);
        assert_eq!(manager.list().current.unwrap().name, "Chem Lab");

        assert!(manager.update("missing", SceneUpdate::default()).is_err());
    }

    #[test]
    fn test_delete_clears_current() {
        let (_dir, _store, manager) = manager();
        let scene = manager.create(new_scene("Lab", "blocked")).unwrap();
        manager.apply(&scene.id).unwrap();

        manager.delete(&scene.id).unwrap();
        let file = manager.list();
        assert!(file.scenes.is_empty());
        assert!(file.current.is_none());
        assert!(manager.delete(&scene.id).is_err());
    }

    #[test]
    fn test_export_one_and_all() {
        let (_dir, _store, manager) = manager();
        let scene = manager.create(new_scene("Lab", "blocked")).unwrap();

        assert_eq!(
            manager.export(Some(&scene.id)).unwrap(),
            SceneExport::Scene(scene.clone())
        );
        match manager.export(None).unwrap() {
            SceneExport::Scenes(file) => assert_eq!(file.scenes, vec![scene]),
            SceneExport::Scene(_) => panic!("expected the whole store"),
        }
        assert!(manager.export(Some("missing")).is_err());
    }

    #[test]
    fn test_import_single_scene_defaults_to_blocked() {
        let (_dir, _store, manager) = manager();
        let outcome = manager
            .import(&json!({"scene": {"id": "s1", "name": "Imported", "type": "weird", "block": ["x.com"]}}))
            .unwrap();
        assert_eq!(outcome, SceneImport::Scene("s1".to_string()));
        let file = manager.list();
        assert_eq!(file.find("s1").unwrap().kind, SceneKind::Blocked);

        // Same id replaces instead of duplicating
        manager
            .import(&json!({"scene": {"id": "s1", "name": "Again", "type": "allowed"}}))
            .unwrap();
        let file = manager.list();
        assert_eq!(file.scenes.len(), 1);
        assert_eq!(file.find("s1").unwrap().kind, SceneKind::Allowed);
    }

    #[test]
    fn test_import_whole_store_accepts_legacy_shape() {
        let (_dir, _store, manager) = manager();
        manager.create(new_scene("Old", "blocked")).unwrap();

        let outcome = manager
            .import(&json!({"scenes": {
                "allowed": [{"id": "a", "name": "Math", "allow": ["desmos.com"]}],
                "blocked": [],
                "current": {"id": "a", "name": "Math", "type": "allowed"}
            }}))
            .unwrap();
        assert_eq!(outcome, SceneImport::Scenes(1));
        let file = manager.list();
        assert_eq!(file.scenes.len(), 1);
        assert_eq!(file.current_scene().unwrap().kind, SceneKind::Allowed);
    }

    #[test]
    fn test_import_rejects_other_payloads() {
        let (_dir, _store, manager) = manager();
        let err = manager.import(&json!({"nothing": true})).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PolicyError>(),
            Some(&PolicyError::InvalidImport)
        );
    }

    #[test]
    fn test_operations_are_audited() {
        let (_dir, store, manager) = manager();
        let scene = manager.create(new_scene("Lab", "blocked")).unwrap();
        manager.apply(&scene.id).unwrap();
        let events: Vec<String> = store.load().audit.into_iter().map(|a| a.event).collect();
        assert_eq!(events, vec!["scene_create", "scene_applied"]);
    }
}
