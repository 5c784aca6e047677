use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use gschool_storage::{Database, PolicyStore, GLOBAL_BLOCK_ALL, UNCATEGORIZED};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::classifier::{Classifier, ClassifierResult};
use crate::config::AppConfig;
use crate::schedule;

/// Block/allow verdict for one URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDecision {
    pub url: String,
    pub blocked: bool,
    pub block_url: String,
    pub result: ClassifierResult,
}

/// Combines classification with per-category flags and schedules
pub struct BlockDecider {
    classifier: Arc<Classifier>,
    store: Arc<PolicyStore>,
    db: Arc<Database>,
    config: Arc<AppConfig>,
}

impl BlockDecider {
    #[must_use]
    pub fn new(
        classifier: Arc<Classifier>,
        store: Arc<PolicyStore>,
        db: Arc<Database>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            classifier,
            store,
            db,
            config,
        }
    }

    /// Classify `url` and decide against the local clock
    ///
    /// # Errors
    ///
    /// Returns an error if category flags cannot be read
    pub async fn decide(&self, url: &str, html: Option<&str>) -> Result<BlockDecision> {
        let result = self.classifier.classify(url, html).await;
        self.decide_at(url, result, Local::now().naive_local())
    }

    /// Decide for an already classified URL at local time `now`.
    ///
    /// "Global Block All" short-circuits the per-category flag. A schedule on
    /// either category replaces its static flag.
    ///
    /// # Errors
    ///
    /// Returns an error if category flags cannot be read
    pub fn decide_at(
        &self,
        url: &str,
        result: ClassifierResult,
        now: NaiveDateTime,
    ) -> Result<BlockDecision> {
        let doc = self.store.load();
        let default_redirect = doc
            .settings
            .blocked_redirect
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| self.config.default_block_url.clone());

        let global_on = self
            .db
            .get_category(GLOBAL_BLOCK_ALL)?
            .is_some_and(|c| schedule::effective_block(c.blocked, c.schedule.as_ref(), now));

        if global_on {
            let lowered = url.to_lowercase();
            let allowed = doc
                .overrides
                .allowlist
                .iter()
                .chain(self.config.always_allowed_hosts.iter())
                .map(|entry| entry.trim().to_lowercase())
                .any(|entry| !entry.is_empty() && lowered.contains(&entry));
            if !allowed {
                log::info!("Blocked {url}: Global Block All is on");
                return Ok(BlockDecision {
                    url: url.to_string(),
                    blocked: true,
                    block_url: default_redirect,
                    result,
                });
            }
        }

        let (blocked, block_url) = match self.db.get_category(&result.category)? {
            Some(category) => (
                schedule::effective_block(category.blocked, category.schedule.as_ref(), now),
                category.block_url.filter(|u| !u.trim().is_empty()),
            ),
            None => {
                log::debug!(
                    "Unknown category '{}', treating as {UNCATEGORIZED}",
                    result.category
                );
                (false, None)
            }
        };

        if blocked {
            log::info!("Blocked {url}: category '{}'", result.category);
        }
        Ok(BlockDecision {
            url: url.to_string(),
            blocked,
            block_url: block_url.unwrap_or(default_redirect),
            result,
        })
    }
}
