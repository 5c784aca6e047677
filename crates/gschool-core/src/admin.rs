use anyhow::Result;
use gschool_storage::{
    AuditEntry, Category, CategoryPatch, ClassPolicy, Database, GlobalOverrides, GlobalSettings,
    PendingCommand, PolicyDocument, PolicyStore, StudentOverride, BROADCAST_TARGET,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::commands::{display_target, TAB_COMMAND_CAP};
use crate::error::PolicyError;
use crate::unix_now;

const NOTIFY_TITLE_MAX: usize = 120;
const NOTIFY_MESSAGE_MAX: usize = 500;
const DEFAULT_NOTIFY_TITLE: &str = "G School";

/// Partial update of the default class
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClassUpdate {
    pub teacher_blocks: Option<Vec<String>>,
    pub allowlist: Option<Vec<String>>,
    pub chat_enabled: Option<bool>,
    pub active: Option<bool>,
    pub passcode: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub blocked_redirect: Option<String>,
    pub chat_enabled: Option<bool>,
    pub passcode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassView {
    pub class: ClassPolicy,
    pub settings: GlobalSettings,
}

/// Flag a class-wide toggle can flip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassToggle {
    FocusMode,
    Paused,
}

impl std::str::FromStr for ClassToggle {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "focus_mode" => Ok(Self::FocusMode),
            "paused" => Ok(Self::Paused),
            other => Err(PolicyError::InvalidToggleKey(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabAction {
    RestoreTabs,
    CloseTabs,
}

impl TabAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RestoreTabs => "restore_tabs",
            Self::CloseTabs => "close_tabs",
        }
    }
}

impl std::str::FromStr for TabAction {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "restore_tabs" => Ok(Self::RestoreTabs),
            "close_tabs" => Ok(Self::CloseTabs),
            other => Err(PolicyError::InvalidTabAction(other.to_string())),
        }
    }
}

/// Exam mode request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExamAction {
    Start { url: String },
    End,
}

impl ExamAction {
    /// Build from the wire form `{action: "start"|"end", url?}`
    ///
    /// # Errors
    ///
    /// Returns `PolicyError` for unknown actions or a start without a url
    pub fn parse(action: &str, url: Option<&str>) -> Result<Self, PolicyError> {
        match action.trim() {
            "start" => {
                let url = url.map(str::trim).unwrap_or_default();
                if url.is_empty() {
                    return Err(PolicyError::MissingField("url"));
                }
                Ok(Self::Start {
                    url: url.to_string(),
                })
            }
            "end" => Ok(Self::End),
            other => Err(PolicyError::InvalidExamAction(other.to_string())),
        }
    }
}

/// YouTube filtering rules kept in the settings store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeRules {
    pub block_keywords: Vec<String>,
    pub block_channels: Vec<String>,
    pub allow: Vec<String>,
    pub allow_mode: bool,
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn non_empty(list: Vec<String>) -> Vec<String> {
    list.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Teacher/admin mutations over the policy document and settings store.
///
/// Each mutation is one locked document update that also appends an audit
/// entry; changes extensions enforce broadcast `policy_refresh`.
pub struct PolicyAdmin {
    store: Arc<PolicyStore>,
    db: Arc<Database>,
}

impl PolicyAdmin {
    #[must_use]
    pub fn new(store: Arc<PolicyStore>, db: Arc<Database>) -> Self {
        Self { store, db }
    }

    /// One locked update: `mutate`, an optional broadcast refresh, then the audit entry
    pub(crate) fn mutate<T, F>(&self, audit: AuditEntry, refresh: bool, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut PolicyDocument, i64) -> Result<T>,
    {
        let now = audit.ts;
        self.store.update(|doc| {
            let out = mutate(doc, now)?;
            if refresh {
                doc.commands
                    .push(BROADCAST_TARGET, PendingCommand::policy_refresh(), now);
            }
            doc.record_audit(audit);
            Ok(out)
        })
    }

    pub(crate) fn document(&self) -> PolicyDocument {
        self.store.load()
    }

    // ---- class ----

    #[must_use]
    pub fn class(&self) -> ClassView {
        let doc = self.store.load();
        ClassView {
            class: doc.default_class(),
            settings: doc.settings,
        }
    }

    /// Update the default class. Activating an inactive class notifies every student.
    ///
    /// List and chat changes are mirrored into the settings store.
    ///
    /// # Errors
    ///
    /// Returns an error if either store cannot be written
    pub fn set_class(&self, update: ClassUpdate) -> Result<ClassView> {
        if let Some(blocks) = &update.teacher_blocks {
            self.db.set_setting("teacher_blocks", blocks)?;
        }
        if let Some(allow) = &update.allowlist {
            self.db.set_setting("teacher_allow", allow)?;
        }
        if let Some(chat) = update.chat_enabled {
            self.db.set_setting("chat_enabled", &chat)?;
        }

        let audit = AuditEntry::new("class_set", unix_now());
        let view = self.mutate(audit, true, |doc, now| {
            let class = doc.default_class_mut();
            let was_active = class.active;
            if let Some(blocks) = update.teacher_blocks {
                class.teacher_blocks = blocks;
            }
            if let Some(allow) = update.allowlist {
                class.allowlist = allow;
            }
            if let Some(active) = update.active {
                class.active = active;
            }
            let activated = class.active && !was_active;

            if let Some(chat) = update.chat_enabled {
                doc.settings.chat_enabled = chat;
            }
            if let Some(passcode) = update.passcode.filter(|p| !p.is_empty()) {
                doc.settings.passcode = Some(passcode);
            }
            if activated {
                log::info!("Class session activated");
                doc.commands.push(
                    BROADCAST_TARGET,
                    PendingCommand::notify(
                        "Class session is active",
                        "Please join and stay until dismissed.",
                    ),
                    now,
                );
            }
            Ok(ClassView {
                class: doc.default_class(),
                settings: doc.settings.clone(),
            })
        })?;
        Ok(view)
    }

    /// Flip `focus_mode` or `paused` for the whole class
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn toggle_class(&self, toggle: ClassToggle, value: bool) -> Result<ClassPolicy> {
        let key = match toggle {
            ClassToggle::FocusMode => "focus_mode",
            ClassToggle::Paused => "paused",
        };
        let audit = AuditEntry::new("class_toggle", unix_now())
            .with("key", key)
            .with("value", value);
        let class = self.mutate(audit, true, |doc, _| {
            let class = doc.default_class_mut();
            match toggle {
                ClassToggle::FocusMode => class.focus_mode = value,
                ClassToggle::Paused => class.paused = value,
            }
            Ok(class.clone())
        })?;
        log::info!("Class {key} set to {value}");
        Ok(class)
    }

    /// Set per-student overrides; only the provided flags change
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::MissingField` for an empty student id
    pub fn set_student_override(
        &self,
        student: &str,
        focus_mode: Option<bool>,
        paused: Option<bool>,
    ) -> Result<StudentOverride> {
        let student = student.trim();
        if student.is_empty() {
            return Err(PolicyError::MissingField("student").into());
        }
        let mut audit = AuditEntry::new("student_set", unix_now()).with("student", student);
        if let Some(focus) = focus_mode {
            audit = audit.with("focus_mode", focus);
        }
        if let Some(paused) = paused {
            audit = audit.with("paused", paused);
        }
        self.mutate(audit, false, |doc, now| {
            let entry = doc
                .student_overrides
                .entry(student.to_string())
                .or_default();
            if focus_mode.is_some() {
                entry.focus_mode = focus_mode;
            }
            if paused.is_some() {
                entry.paused = paused;
            }
            let out = entry.clone();
            doc.commands
                .push(student, PendingCommand::policy_refresh(), now);
            Ok(out)
        })
    }

    // ---- announcements and commands ----

    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn announce(&self, text: &str) -> Result<()> {
        let text = text.trim().to_string();
        let audit = AuditEntry::new("announce", unix_now()).with("message", text.as_str());
        self.mutate(audit, true, |doc, _| {
            doc.announcement = text;
            Ok(())
        })
    }

    /// Queue a raw command (`{"type": ..., ...}`) for a student or everyone
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::MissingField("type")` if the command has no type
    pub fn push_command(&self, target: Option<&str>, command: Value) -> Result<PendingCommand> {
        let command = PendingCommand::from_value(command).ok_or(PolicyError::MissingField("type"))?;
        let target = display_target(target.unwrap_or_default()).to_string();
        let audit = AuditEntry::new("command", unix_now())
            .with("target", target.as_str())
            .with("type", command.kind.as_str());
        let queued = command.clone();
        self.mutate(audit, false, |doc, now| {
            doc.commands.push(&target, command, now);
            Ok(())
        })?;
        log::info!("Command '{}' queued for {target}", queued.kind);
        Ok(queued)
    }

    /// Open tabs for one student (bounded queue) or the whole class
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::MissingField("urls")` when no usable url is given
    pub fn open_tabs(&self, student: Option<&str>, urls: Vec<String>) -> Result<()> {
        let urls = non_empty(urls);
        if urls.is_empty() {
            return Err(PolicyError::MissingField("urls").into());
        }
        let student = student.map(str::trim).filter(|s| !s.is_empty());
        let now = unix_now();
        let command = PendingCommand::open_tabs(&urls, now);
        let audit = match student {
            Some(s) => AuditEntry::new("student_tabs", now).with("student", s),
            None => AuditEntry::new("class_tabs", now).with("target", BROADCAST_TARGET),
        }
        .with("type", "open_tabs")
        .with("count", urls.len());

        self.mutate(audit, false, |doc, now| {
            match student {
                Some(s) => doc.commands.push_capped(s, command, TAB_COMMAND_CAP),
                None => doc.commands.push(BROADCAST_TARGET, command, now),
            }
            Ok(())
        })
    }

    /// Ask one student's extension to restore or close tabs
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::MissingField` for an empty student id
    pub fn tabs_action(&self, student: &str, action: TabAction) -> Result<()> {
        let student = student.trim();
        if student.is_empty() {
            return Err(PolicyError::MissingField("student").into());
        }
        let now = unix_now();
        let audit = AuditEntry::new("student_tabs", now)
            .with("student", student)
            .with("type", action.as_str());
        self.mutate(audit, false, |doc, now| {
            doc.commands.push_capped(
                student,
                PendingCommand::new(action.as_str()).with("ts", now),
                TAB_COMMAND_CAP,
            );
            Ok(())
        })
    }

    /// Start or end exam mode for everyone
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn exam(&self, action: ExamAction) -> Result<()> {
        let now = unix_now();
        let audit = match &action {
            ExamAction::Start { url } => AuditEntry::new("exam", now)
                .with("action", "start")
                .with("url", url.as_str()),
            ExamAction::End => AuditEntry::new("exam", now).with("action", "end"),
        };
        self.mutate(audit, false, |doc, now| {
            match action {
                ExamAction::Start { url } => {
                    doc.commands.push(
                        BROADCAST_TARGET,
                        PendingCommand::new("exam_start").with("url", url.as_str()),
                        now,
                    );
                    doc.exam.active = true;
                    doc.exam.url = Some(url);
                }
                ExamAction::End => {
                    doc.commands
                        .push(BROADCAST_TARGET, PendingCommand::new("exam_end"), now);
                    doc.exam.active = false;
                }
            }
            Ok(())
        })
    }

    /// Broadcast a notification. Title and message are truncated to 120 and 500 characters.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn notify(&self, title: Option<&str>, message: &str) -> Result<PendingCommand> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_NOTIFY_TITLE);
        let title = truncate_chars(title, NOTIFY_TITLE_MAX);
        let message = truncate_chars(message, NOTIFY_MESSAGE_MAX);
        let command = PendingCommand::notify(&title, &message);

        let audit = AuditEntry::new("notify", unix_now()).with("title", title.as_str());
        let queued = command.clone();
        self.mutate(audit, false, |doc, now| {
            doc.commands.push(BROADCAST_TARGET, command, now);
            Ok(())
        })?;
        Ok(queued)
    }

    // ---- settings ----

    #[must_use]
    pub fn settings(&self) -> GlobalSettings {
        self.store.load().settings
    }

    /// # Errors
    ///
    /// Returns an error if either store cannot be written
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<GlobalSettings> {
        if let Some(chat) = update.chat_enabled {
            self.db.set_setting("chat_enabled", &chat)?;
        }
        let audit = AuditEntry::new("settings_update", unix_now());
        self.mutate(audit, true, |doc, _| {
            if let Some(redirect) = update.blocked_redirect {
                let redirect = redirect.trim().to_string();
                doc.settings.blocked_redirect = (!redirect.is_empty()).then_some(redirect);
            }
            if let Some(chat) = update.chat_enabled {
                doc.settings.chat_enabled = chat;
            }
            if let Some(passcode) = update.passcode.filter(|p| !p.is_empty()) {
                doc.settings.passcode = Some(passcode);
            }
            Ok(doc.settings.clone())
        })
    }

    #[must_use]
    pub fn overrides(&self) -> GlobalOverrides {
        self.store.load().overrides
    }

    /// Replace the site-wide allowlist and teacher blocks
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn set_overrides(&self, overrides: GlobalOverrides) -> Result<()> {
        let overrides = GlobalOverrides {
            allowlist: non_empty(overrides.allowlist),
            teacher_blocks: non_empty(overrides.teacher_blocks),
        };
        self.mutate(AuditEntry::new("overrides_save", unix_now()), true, |doc, _| {
            doc.overrides = overrides;
            Ok(())
        })
    }

    #[must_use]
    pub fn extension_enabled(&self) -> bool {
        self.store.load().extension_enabled
    }

    /// Global kill switch for every student extension
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn set_extension_enabled(&self, enabled: bool) -> Result<bool> {
        let audit = AuditEntry::new("extension_toggle", unix_now()).with("enabled", enabled);
        self.mutate(audit, false, |doc, _| {
            doc.extension_enabled = enabled;
            Ok(())
        })?;
        log::info!(
            "Extension toggle: {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(enabled)
    }

    // ---- categories ----

    /// # Errors
    ///
    /// Returns an error if the query fails
    pub fn categories(&self) -> Result<Vec<Category>> {
        self.db.list_categories()
    }

    /// Apply a partial category update and refresh every client.
    /// A `null` schedule removes the category's schedule.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::MissingField("name")` for an empty name, or a storage error
    pub fn update_category(&self, mut patch: CategoryPatch) -> Result<Category> {
        patch.name = patch.name.trim().to_string();
        if patch.name.is_empty() {
            return Err(PolicyError::MissingField("name").into());
        }
        if patch.schedule.as_ref().is_some_and(Value::is_null) {
            self.db.clear_category_schedule(&patch.name)?;
            patch.schedule = None;
        }
        let category = self.db.update_category(&patch)?;
        let audit =
            AuditEntry::new("category_update", unix_now()).with("name", category.name.as_str());
        self.mutate(audit, true, |_, _| Ok(()))?;
        Ok(category)
    }

    // ---- YouTube and doodles ----

    /// # Errors
    ///
    /// Returns an error if the settings store cannot be read
    pub fn youtube_rules(&self) -> Result<YoutubeRules> {
        Ok(YoutubeRules {
            block_keywords: self.db.get_setting("yt_block_keywords", Vec::new())?,
            block_channels: self.db.get_setting("yt_block_channels", Vec::new())?,
            allow: self.db.get_setting("yt_allow", Vec::new())?,
            allow_mode: self.db.get_setting("yt_allow_mode", false)?,
        })
    }

    /// Store the rules and push them to every extension
    ///
    /// # Errors
    ///
    /// Returns an error if either store cannot be written
    pub fn set_youtube_rules(&self, rules: YoutubeRules) -> Result<()> {
        self.db.set_setting("yt_block_keywords", &rules.block_keywords)?;
        self.db.set_setting("yt_block_channels", &rules.block_channels)?;
        self.db.set_setting("yt_allow", &rules.allow)?;
        self.db.set_setting("yt_allow_mode", &rules.allow_mode)?;

        let payload = serde_json::to_value(&rules)?;
        self.mutate(AuditEntry::new("youtube_rules_update", unix_now()), false, |doc, now| {
            doc.commands.push(
                BROADCAST_TARGET,
                PendingCommand::new("update_youtube_rules").with("rules", payload),
                now,
            );
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns an error if the settings store cannot be read
    pub fn doodle_block(&self) -> Result<bool> {
        self.db.get_setting("block_google_doodles", false)
    }

    /// # Errors
    ///
    /// Returns an error if either store cannot be written
    pub fn set_doodle_block(&self, enabled: bool) -> Result<bool> {
        self.db.set_setting("block_google_doodles", &enabled)?;
        let audit = AuditEntry::new("doodle_block_update", unix_now()).with("enabled", enabled);
        self.mutate(audit, false, |_, _| Ok(()))?;
        Ok(enabled)
    }

    /// Newest audit entries, oldest first
    #[must_use]
    pub fn audit_log(&self, limit: usize) -> Vec<AuditEntry> {
        let audit = self.store.load().audit;
        let skip = audit.len().saturating_sub(limit);
        audit.into_iter().skip(skip).collect()
    }
}
