use anyhow::Result;
use chrono::{DateTime, Local};
use gschool_storage::{
    Category, Database, PendingCommand, PolicyStore, SceneKind, SceneRef, SceneStore, Schedule,
    DEFAULT_CLASS_ID,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::schedule;

/// Category state as seen by an extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCategory {
    pub blocked: bool,
    pub block_url: Option<String>,
    pub schedule: Option<Schedule>,
    /// Block flag after the schedule (if any) replaced the static flag
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSummary {
    pub id: String,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SceneStatus {
    pub current: Option<SceneRef>,
}

/// The merged policy returned to a polling extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivePolicy {
    pub blocked_redirect: String,
    pub categories: BTreeMap<String, ResolvedCategory>,
    pub focus_mode: bool,
    pub paused: bool,
    pub announcement: String,
    pub class: ClassSummary,
    pub allowlist: Vec<String>,
    pub teacher_blocks: Vec<String>,
    pub chat_enabled: bool,
    pub pending: Vec<PendingCommand>,
    pub ts: i64,
    pub scenes: SceneStatus,
}

/// Composes class policy, student overrides, the current scene and category
/// schedules into one `EffectivePolicy` per request.
pub struct PolicyResolver {
    store: Arc<PolicyStore>,
    scenes: Arc<SceneStore>,
    db: Arc<Database>,
    default_redirect: String,
}

impl PolicyResolver {
    #[must_use]
    pub fn new(
        store: Arc<PolicyStore>,
        scenes: Arc<SceneStore>,
        db: Arc<Database>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            scenes,
            db,
            default_redirect: config.default_block_url.clone(),
        }
    }

    /// Resolve against the local clock
    ///
    /// # Errors
    ///
    /// Returns an error if the drained queue cannot be saved or categories cannot be read
    pub fn resolve(&self, student_id: &str) -> Result<EffectivePolicy> {
        self.resolve_at(student_id, Local::now())
    }

    /// Resolve for `student_id` at `now`.
    ///
    /// Pending commands for the student are drained in the same locked update
    /// that reads the document. An empty id gets no overrides and drains nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the drained queue cannot be saved or categories cannot be read
    pub fn resolve_at(&self, student_id: &str, now: DateTime<Local>) -> Result<EffectivePolicy> {
        let student = student_id.trim();
        let ts = now.timestamp();

        let (doc, pending) = if student.is_empty() {
            (self.store.load(), Vec::new())
        } else {
            self.store.update(|doc| {
                let pending = doc.commands.take_all(student, ts);
                Ok((doc.clone(), pending))
            })?
        };

        let class = doc.default_class();
        let mut focus_mode = class.focus_mode;
        let mut paused = class.paused;
        if let Some(overrides) = doc.student_overrides.get(student).filter(|_| !student.is_empty()) {
            focus_mode = overrides.focus_mode.unwrap_or(focus_mode);
            paused = overrides.paused.unwrap_or(paused);
        }

        let mut allowlist = class.allowlist.clone();
        let mut teacher_blocks = class.teacher_blocks.clone();

        let scene_file = self.scenes.load();
        let current_scene = scene_file.current_scene();
        if let Some(scene) = current_scene {
            match scene.kind {
                SceneKind::Allowed => {
                    allowlist.clone_from(&scene.allow);
                    focus_mode = true;
                }
                SceneKind::Blocked => teacher_blocks.extend(scene.block.iter().cloned()),
            }
        }

        let local = now.naive_local();
        let categories = self
            .db
            .list_categories()?
            .into_iter()
            .map(|category| resolve_category(category, local))
            .collect();

        if !pending.is_empty() {
            log::info!("Delivered {} pending command(s) to {student}", pending.len());
        }

        Ok(EffectivePolicy {
            blocked_redirect: doc
                .settings
                .blocked_redirect
                .clone()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| self.default_redirect.clone()),
            categories,
            focus_mode,
            paused,
            announcement: doc.announcement.clone(),
            class: ClassSummary {
                id: DEFAULT_CLASS_ID.to_string(),
                name: class.name,
                active: class.active,
            },
            allowlist,
            teacher_blocks,
            chat_enabled: doc.settings.chat_enabled,
            pending,
            ts,
            scenes: SceneStatus {
                current: current_scene.map(gschool_storage::Scene::to_ref),
            },
        })
    }
}

fn resolve_category(category: Category, now: chrono::NaiveDateTime) -> (String, ResolvedCategory) {
    let active = schedule::effective_block(category.blocked, category.schedule.as_ref(), now);
    (
        category.name,
        ResolvedCategory {
            blocked: category.blocked,
            block_url: category.block_url,
            schedule: category.schedule,
            active,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gschool_storage::{CategoryPatch, Scene, StudentOverride};
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<PolicyStore>,
        scenes: Arc<SceneStore>,
        db: Arc<Database>,
        resolver: PolicyResolver,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PolicyStore::new(dir.path().join("data.json")));
        let scenes = Arc::new(SceneStore::new(dir.path().join("scenes.json")));
        let db = Arc::new(Database::open_in_memory().unwrap());
        let resolver = PolicyResolver::new(
            store.clone(),
            scenes.clone(),
            db.clone(),
            &AppConfig::default(),
        );
        Fixture {
            _dir: dir,
            store,
            scenes,
            db,
            resolver,
        }
    }

    // Wednesday
    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    fn add_scene(f: &Fixture, scene: Scene, make_current: bool) {
        f.scenes
            .update(|file| {
                if make_current {
                    file.current = Some(scene.to_ref());
                }
                file.scenes.push(scene);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_defaults_for_anonymous_poll() {
        let f = fixture();
        let policy = f.resolver.resolve_at("", noon()).unwrap();

        assert_eq!(policy.blocked_redirect, crate::config::DEFAULT_BLOCK_URL);
        assert_eq!(policy.class.id, "period1");
        assert_eq!(policy.class.name, "Period 1");
        assert!(policy.class.active);
        assert!(!policy.focus_mode);
        assert!(!policy.paused);
        assert!(policy.pending.is_empty());
        assert_eq!(policy.categories.len(), 23);
        assert!(policy.scenes.current.is_none());
        assert_eq!(policy.ts, noon().timestamp());
    }

    #[test]
    fn test_student_override_wins_only_when_set() {
        let f = fixture();
        f.store
            .update(|doc| {
                doc.default_class_mut().focus_mode = true;
                doc.student_overrides.insert(
                    "alice".to_string(),
                    StudentOverride {
                        focus_mode: None,
                        paused: Some(true),
                    },
                );
                Ok(())
            })
            .unwrap();

        let alice = f.resolver.resolve_at("alice", noon()).unwrap();
        assert!(alice.paused);
        assert!(alice.focus_mode);

        let bob = f.resolver.resolve_at("bob", noon()).unwrap();
        assert!(!bob.paused);
        assert!(bob.focus_mode);
    }

    #[test]
    fn test_override_can_turn_class_flag_off() {
        let f = fixture();
        f.store
            .update(|doc| {
                doc.default_class_mut().paused = true;
                doc.student_overrides.insert(
                    "alice".to_string(),
                    StudentOverride {
                        focus_mode: None,
                        paused: Some(false),
                    },
                );
                Ok(())
            })
            .unwrap();
        assert!(!f.resolver.resolve_at("alice", noon()).unwrap().paused);
    }

    #[test]
    fn test_pending_commands_drained_once() {
        let f = fixture();
        f.store
            .update(|doc| {
                doc.commands
                    .push("alice", PendingCommand::new("close_tabs"), noon().timestamp());
                Ok(())
            })
            .unwrap();

        let first = f.resolver.resolve_at("alice", noon()).unwrap();
        assert_eq!(first.pending, vec![PendingCommand::new("close_tabs")]);
        let second = f.resolver.resolve_at("alice", noon()).unwrap();
        assert!(second.pending.is_empty());
    }

    #[test]
    fn test_empty_student_does_not_drain() {
        let f = fixture();
        f.store
            .update(|doc| {
                doc.commands
                    .push("*", PendingCommand::policy_refresh(), noon().timestamp());
                Ok(())
            })
            .unwrap();

        assert!(f.resolver.resolve_at("  ", noon()).unwrap().pending.is_empty());
        assert_eq!(f.resolver.resolve_at("alice", noon()).unwrap().pending.len(), 1);
    }

    #[test]
    fn test_allowed_scene_replaces_allowlist_and_forces_focus() {
        let f = fixture();
        f.store
            .update(|doc| {
                doc.default_class_mut().allowlist = vec!["wikipedia.org".to_string()];
                Ok(())
            })
            .unwrap();
        let mut scene = Scene::new("Math", SceneKind::Allowed);
        scene.allow = vec!["desmos.com".to_string()];
        add_scene(&f, scene, true);

        let policy = f.resolver.resolve_at("alice", noon()).unwrap();
        assert!(policy.focus_mode);
        assert_eq!(policy.allowlist, vec!["desmos.com".to_string()]);
        assert_eq!(policy.scenes.current.unwrap().name, "Math");
    }

    #[test]
    fn test_blocked_scene_appends_teacher_blocks() {
        let f = fixture();
        f.store
            .update(|doc| {
                doc.default_class_mut().teacher_blocks = vec!["youtube.com".to_string()];
                Ok(())
            })
            .unwrap();
        let mut scene = Scene::new("No games", SceneKind::Blocked);
        scene.block = vec!["roblox.com".to_string()];
        add_scene(&f, scene, true);

        let policy = f.resolver.resolve_at("alice", noon()).unwrap();
        assert!(!policy.focus_mode);
        assert_eq!(
            policy.teacher_blocks,
            vec!["youtube.com".to_string(), "roblox.com".to_string()]
        );
    }

    #[test]
    fn test_inactive_scene_has_no_effect() {
        let f = fixture();
        let mut scene = Scene::new("Math", SceneKind::Allowed);
        scene.allow = vec!["desmos.com".to_string()];
        add_scene(&f, scene, false);

        let policy = f.resolver.resolve_at("alice", noon()).unwrap();
        assert!(!policy.focus_mode);
        assert!(policy.allowlist.is_empty());
    }

    #[test]
    fn test_dangling_current_scene_is_ignored() {
        let f = fixture();
        f.scenes
            .update(|file| {
                file.current = Some(Scene::new("Gone", SceneKind::Allowed).to_ref());
                Ok(())
            })
            .unwrap();

        let policy = f.resolver.resolve_at("alice", noon()).unwrap();
        assert!(!policy.focus_mode);
        assert!(policy.scenes.current.is_none());
    }

    #[test]
    fn test_category_schedule_evaluated_at_resolution_time() {
        let f = fixture();
        f.db.update_category(&CategoryPatch {
            name: "Games".to_string(),
            blocked: Some(true),
            schedule: Some(json!({"enabled": true, "start": "08:00", "end": "09:00"})),
            ..CategoryPatch::default()
        })
        .unwrap();

        let policy = f.resolver.resolve_at("", noon()).unwrap();
        let games = &policy.categories["Games"];
        assert!(games.blocked);
        assert!(!games.active);

        let morning = Local.with_ymd_and_hms(2024, 1, 10, 8, 30, 0).unwrap();
        let policy = f.resolver.resolve_at("", morning).unwrap();
        assert!(policy.categories["Games"].active);
    }

    #[test]
    fn test_document_redirect_and_announcement() {
        let f = fixture();
        f.store
            .update(|doc| {
                doc.settings.blocked_redirect = Some("https://block.school.test".to_string());
                doc.settings.chat_enabled = true;
                doc.announcement = "Quiz at 10".to_string();
                Ok(())
            })
            .unwrap();

        let policy = f.resolver.resolve_at("", noon()).unwrap();
        assert_eq!(policy.blocked_redirect, "https://block.school.test");
        assert_eq!(policy.announcement, "Quiz at 10");
        assert!(policy.chat_enabled);
    }

    #[test]
    fn test_resolution_is_idempotent_apart_from_pending() {
        let f = fixture();
        let first = f.resolver.resolve_at("alice", noon()).unwrap();
        let second = f.resolver.resolve_at("alice", noon()).unwrap();
        assert_eq!(first, second);
    }
}
