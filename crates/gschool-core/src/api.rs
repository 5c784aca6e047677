use anyhow::{Context, Result};
use gschool_storage::{Category, CategoryPatch, Database, PolicyStore, SceneStore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::admin::PolicyAdmin;
use crate::classifier::{Classifier, ClassifierResult, HttpPageFetcher, KeywordTable};
use crate::commands::CommandQueue;
use crate::config::{AppConfig, DataPaths};
use crate::decision::{BlockDecider, BlockDecision};
use crate::presence::PresenceTracker;
use crate::resolver::{EffectivePolicy, PolicyResolver};
use crate::scenes::SceneManager;
use crate::signaling::PresentationStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub url: String,
    #[serde(flatten)]
    pub result: ClassifierResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRequest {
    #[serde(default)]
    pub student: String,
}

/// `{name, blocked?, block_url?, schedule?}`; only present fields change
pub type CategoryUpdateRequest = CategoryPatch;

/// Everything a request handler needs, wired over one data directory
pub struct ControlPlane {
    config: Arc<AppConfig>,
    paths: DataPaths,
    classifier: Arc<Classifier>,
    resolver: PolicyResolver,
    decider: BlockDecider,
    admin: PolicyAdmin,
    scenes: SceneManager,
    presence: PresenceTracker,
    commands: CommandQueue,
    presentation: PresentationStore,
}

impl ControlPlane {
    /// Open (creating if needed) the stores under `data_dir` with an HTTP page fetcher
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, config, database or HTTP client cannot be set up
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
        let config = AppConfig::load(data_dir)?;
        let paths = DataPaths::new(data_dir);
        let db = Database::new(Some(paths.database.clone()))?;
        let fetcher = HttpPageFetcher::new(Duration::from_secs(config.fetch_timeout_secs))?;
        let classifier = Classifier::new(KeywordTable::builtin(), Arc::new(fetcher));
        Ok(Self::with_parts(paths, config, db, classifier))
    }

    #[must_use]
    pub fn with_parts(
        paths: DataPaths,
        config: AppConfig,
        db: Database,
        classifier: Classifier,
    ) -> Self {
        let config = Arc::new(config);
        let db = Arc::new(db);
        let classifier = Arc::new(classifier);
        let store = Arc::new(PolicyStore::new(paths.document.clone()));
        let scene_store = Arc::new(SceneStore::new(paths.scenes.clone()));

        Self {
            resolver: PolicyResolver::new(store.clone(), scene_store.clone(), db.clone(), &config),
            decider: BlockDecider::new(classifier.clone(), store.clone(), db.clone(), config.clone()),
            admin: PolicyAdmin::new(store.clone(), db),
            presence: PresenceTracker::new(store.clone(), scene_store.clone()),
            scenes: SceneManager::new(scene_store, store.clone()),
            commands: CommandQueue::new(store),
            presentation: PresentationStore::new(&config),
            classifier,
            config,
            paths,
        }
    }

    pub async fn classify(&self, request: &ClassifyRequest) -> ClassifyResponse {
        let result = self
            .classifier
            .classify(&request.url, request.html.as_deref())
            .await;
        log::debug!(
            "Classified {} as '{}' ({:.2})",
            request.url,
            result.category,
            result.confidence
        );
        ClassifyResponse {
            url: request.url.clone(),
            result,
        }
    }

    /// # Errors
    ///
    /// Returns an error if category flags cannot be read
    pub async fn decide(&self, request: &ClassifyRequest) -> Result<BlockDecision> {
        self.decider
            .decide(&request.url, request.html.as_deref())
            .await
    }

    /// # Errors
    ///
    /// Returns an error if the drained queue cannot be saved or categories cannot be read
    pub fn policy(&self, request: &PolicyRequest) -> Result<EffectivePolicy> {
        self.resolver.resolve(&request.student)
    }

    /// # Errors
    ///
    /// Returns an error for an empty name or a storage failure
    pub fn update_category(&self, request: CategoryUpdateRequest) -> Result<Category> {
        self.admin.update_category(request)
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    #[must_use]
    pub fn admin(&self) -> &PolicyAdmin {
        &self.admin
    }

    #[must_use]
    pub fn scenes(&self) -> &SceneManager {
        &self.scenes
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    #[must_use]
    pub fn commands(&self) -> &CommandQueue {
        &self.commands
    }

    #[must_use]
    pub fn presentation(&self) -> &PresentationStore {
        &self.presentation
    }
}
