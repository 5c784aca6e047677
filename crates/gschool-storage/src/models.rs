use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Synthetic category whose keywords win over every content signal
pub const ALLOW_ONLY: &str = "Allow only";
/// Synthetic category that blocks everything except the global allowlist
pub const GLOBAL_BLOCK_ALL: &str = "Global Block All";
pub const UNCATEGORIZED: &str = "Uncategorized";
pub const GENERAL_EDUCATION: &str = "General / Education";
pub const BLOGS: &str = "Blogs";

/// The single class every policy resolution reads
pub const DEFAULT_CLASS_ID: &str = "period1";
/// Queue target meaning "every student"
pub const BROADCAST_TARGET: &str = "*";

/// Fixed, ordered category enumeration. Order is the classifier tie-break order.
pub const CATEGORY_NAMES: [&str; 23] = [
    "Advertising",
    "AI Chatbots & Tools",
    "App Stores & System Updates",
    "Blogs",
    "Built-in Apps",
    "Collaboration",
    "Drugs & Alcohol",
    "Ecommerce",
    "Entertainment",
    "Gambling",
    "Games",
    "General / Education",
    "Health & Medicine",
    "Illegal, Malicious, or Hacking",
    "Religion",
    "Sexual Content",
    "Social Media",
    "Sports & Hobbies",
    "Streaming Services",
    "Weapons",
    "Uncategorized",
    "Allow only",
    "Global Block All",
];

const BROADCAST_RETENTION: usize = 200;
const AUDIT_RETENTION: usize = 500;

/// Time-of-day window attached to a category.
///
/// The serialized field names are the persisted shape and must not change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    pub weekdays_only: bool,
}

impl Schedule {
    /// Parse a stored schedule. Anything that is not a non-empty JSON object is "no schedule".
    #[must_use]
    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|value| Self::from_value(&value))
    }

    /// Lenient conversion from an arbitrary JSON value
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.is_empty() {
            return None;
        }
        Some(Self {
            enabled: obj.get("enabled").is_some_and(is_truthy),
            start: obj.get("start").and_then(text_of),
            end: obj.get("end").and_then(text_of),
            weekdays_only: obj.get("weekdays_only").is_some_and(is_truthy),
        })
    }

    #[must_use]
    pub fn window(start: &str, end: &str) -> Self {
        Self {
            enabled: true,
            start: Some(start.to_string()),
            end: Some(end.to_string()),
            weekdays_only: false,
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Content category with its block configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub blocked: bool,
    pub block_url: Option<String>,
    pub schedule: Option<Schedule>,
}

impl Category {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocked: false,
            block_url: None,
            schedule: None,
        }
    }
}

/// Partial category update. Absent fields are left untouched.
///
/// `block_url: Some(None)` clears the URL; `schedule` is stored verbatim
/// and read back leniently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryPatch {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub block_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "present_value", skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Value>,
}

/// Distinguish an explicit `null` from an absent key
fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Class-level policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassPolicy {
    pub name: String,
    pub active: bool,
    pub focus_mode: bool,
    pub paused: bool,
    pub allowlist: Vec<String>,
    pub teacher_blocks: Vec<String>,
    pub students: Vec<String>,
}

impl Default for ClassPolicy {
    fn default() -> Self {
        Self {
            name: String::from("Period 1"),
            active: true,
            focus_mode: false,
            paused: false,
            allowlist: Vec::new(),
            teacher_blocks: Vec::new(),
            students: Vec::new(),
        }
    }
}

/// Per-student flags that shadow the class values when set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

/// Scene flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneKind {
    /// Allow-only: replaces the allowlist and forces focus mode
    Allowed,
    /// Extra block patterns appended to the teacher blocks
    Blocked,
}

impl SceneKind {
    #[must_use]
    pub fn parse_kind(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "allowed" | "allow" => Some(Self::Allowed),
            "blocked" | "block" => Some(Self::Blocked),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for SceneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SceneKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_kind(s).ok_or_else(|| format!("Unknown scene type: {s}. Use: allowed, blocked"))
    }
}

fn default_icon() -> String {
    String::from("blue")
}

/// Named allow-only or block-list preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SceneKind,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub block: Vec<String>,
    #[serde(default = "default_icon")]
    pub icon: String,
}

impl Scene {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: SceneKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            allow: Vec::new(),
            block: Vec::new(),
            icon: default_icon(),
        }
    }

    #[must_use]
    pub fn to_ref(&self) -> SceneRef {
        SceneRef {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
        }
    }
}

/// Pointer to the globally current scene
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneRef {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SceneKind,
}

/// One-shot instruction for an extension client: `{"type": ..., ...payload}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCommand {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl PendingCommand {
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Build from arbitrary JSON; `None` unless it is an object with a non-empty string `type`
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut map) = value else {
            return None;
        };
        let kind = match map.remove("type") {
            Some(Value::String(kind)) if !kind.trim().is_empty() => kind,
            _ => return None,
        };
        Some(Self { kind, payload: map })
    }

    #[must_use]
    pub fn policy_refresh() -> Self {
        Self::new("policy_refresh")
    }

    #[must_use]
    pub fn notify(title: &str, message: &str) -> Self {
        Self::new("notify")
            .with("title", title)
            .with("message", message)
    }

    #[must_use]
    pub fn open_tabs(urls: &[String], ts: i64) -> Self {
        Self::new("open_tabs").with("urls", urls.to_vec()).with("ts", ts)
    }
}

/// Broadcast entry with a sequence number so each student sees it once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastCommand {
    pub seq: u64,
    pub queued_at: i64,
    pub command: PendingCommand,
}

/// Pending command queues: per-student FIFOs plus a broadcast log with per-student cursors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandQueues {
    pub per_student: BTreeMap<String, Vec<PendingCommand>>,
    pub broadcast: Vec<BroadcastCommand>,
    pub next_seq: u64,
    pub cursors: BTreeMap<String, u64>,
}

impl CommandQueues {
    /// How far back a student polling for the first time can see broadcasts
    pub const FIRST_POLL_WINDOW_SECS: i64 = 300;

    /// Queue a command. Target `*` (or empty) broadcasts.
    pub fn push(&mut self, target: &str, command: PendingCommand, now: i64) {
        let target = target.trim();
        if target.is_empty() || target == BROADCAST_TARGET {
            self.next_seq += 1;
            self.broadcast.push(BroadcastCommand {
                seq: self.next_seq,
                queued_at: now,
                command,
            });
            keep_last(&mut self.broadcast, BROADCAST_RETENTION);
        } else {
            self.per_student
                .entry(target.to_string())
                .or_default()
                .push(command);
        }
    }

    /// Queue for one student, keeping only the newest `cap` entries
    pub fn push_capped(&mut self, student: &str, command: PendingCommand, cap: usize) {
        let queue = self.per_student.entry(student.to_string()).or_default();
        queue.push(command);
        keep_last(queue, cap);
    }

    fn unseen<'a>(
        &'a self,
        student: &str,
        now: i64,
    ) -> impl Iterator<Item = &'a BroadcastCommand> + 'a {
        let cursor = self.cursors.get(student).copied();
        self.broadcast.iter().filter(move |entry| match cursor {
            Some(seen) => entry.seq > seen,
            None => now - entry.queued_at <= Self::FIRST_POLL_WINDOW_SECS,
        })
    }

    /// Remove and return everything this student has not received yet.
    ///
    /// Per-student commands come first, then unseen broadcasts in queue order.
    pub fn take_all(&mut self, student: &str, now: i64) -> Vec<PendingCommand> {
        let mut taken = self.per_student.remove(student).unwrap_or_default();
        taken.extend(self.unseen(student, now).map(|entry| entry.command.clone()));
        self.cursors.insert(student.to_string(), self.next_seq);
        taken
    }

    /// Count of commands waiting for a student without consuming them
    #[must_use]
    pub fn pending_count(&self, student: &str, now: i64) -> usize {
        let own = self.per_student.get(student).map_or(0, Vec::len);
        own + self.unseen(student, now).count()
    }
}

/// Latest heartbeat state for a student
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceRecord {
    pub last_seen: i64,
    pub student_name: String,
    pub tab: Map<String, Value>,
    pub tabs: Vec<Value>,
    pub screenshot: String,
    pub tabshots: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineEntry {
    pub ts: i64,
    pub title: String,
    pub url: String,
    #[serde(rename = "favIconUrl")]
    pub fav_icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotEntry {
    pub ts: i64,
    #[serde(rename = "tabId")]
    pub tab_id: Option<Value>,
    #[serde(rename = "dataUrl")]
    pub data_url: Option<String>,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    pub chat_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passcode: Option<String>,
}

/// Site-wide lists maintained by admins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalOverrides {
    pub allowlist: Vec<String>,
    pub teacher_blocks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamState {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: i64,
    pub event: String,
    #[serde(flatten)]
    pub detail: Map<String, Value>,
}

impl AuditEntry {
    #[must_use]
    pub fn new(event: &str, ts: i64) -> Self {
        Self {
            ts,
            event: event.to_string(),
            detail: Map::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }
}

/// Tab or window violation reported by an extension during exam mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamViolation {
    pub ts: i64,
    pub student: String,
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionResponse {
    pub response: String,
    pub ts: i64,
}

/// The most recent attention check and the replies it collected
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionCheck {
    pub title: String,
    pub timeout: u32,
    pub ts: i64,
    pub responses: BTreeMap<String, AttentionResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollResponse {
    pub student: String,
    pub answer: Value,
    pub ts: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Poll {
    pub question: String,
    pub options: Vec<String>,
    pub created: i64,
    pub responses: Vec<PollResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaisedHand {
    pub student: String,
    pub note: String,
    pub ts: i64,
}

/// Result of one off-task check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffTaskEvent {
    pub student: String,
    pub url: String,
    pub ts: i64,
    pub on_task: bool,
}

/// Teacher-facing alert about a student (off task by default)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Alert {
    pub ts: i64,
    pub student: String,
    pub kind: String,
    pub score: f64,
    pub title: String,
    pub url: String,
    pub note: String,
}

/// Drop the oldest entries so at most `cap` remain
pub fn keep_last<T>(list: &mut Vec<T>, cap: usize) {
    if list.len() > cap {
        let excess = list.len() - cap;
        list.drain(..excess);
    }
}

/// The persisted policy document (`data.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDocument {
    pub settings: GlobalSettings,
    pub classes: BTreeMap<String, ClassPolicy>,
    pub student_overrides: BTreeMap<String, StudentOverride>,
    pub commands: CommandQueues,
    #[serde(alias = "announcements")]
    pub announcement: String,
    pub overrides: GlobalOverrides,
    pub presence: BTreeMap<String, PresenceRecord>,
    pub history: BTreeMap<String, Vec<TimelineEntry>>,
    pub screenshots: BTreeMap<String, Vec<ScreenshotEntry>>,
    pub extension_enabled: bool,
    pub exam: ExamState,
    pub audit: Vec<AuditEntry>,
    pub exam_violations: Vec<ExamViolation>,
    pub attention_check: Option<AttentionCheck>,
    pub polls: BTreeMap<String, Poll>,
    pub raises: Vec<RaisedHand>,
    pub offtask_events: Vec<OffTaskEvent>,
    pub alerts: Vec<Alert>,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        let mut classes = BTreeMap::new();
        classes.insert(DEFAULT_CLASS_ID.to_string(), ClassPolicy::default());
        Self {
            settings: GlobalSettings::default(),
            classes,
            student_overrides: BTreeMap::new(),
            commands: CommandQueues::default(),
            announcement: String::new(),
            overrides: GlobalOverrides::default(),
            presence: BTreeMap::new(),
            history: BTreeMap::new(),
            screenshots: BTreeMap::new(),
            extension_enabled: true,
            exam: ExamState::default(),
            audit: Vec::new(),
            exam_violations: Vec::new(),
            attention_check: None,
            polls: BTreeMap::new(),
            raises: Vec::new(),
            offtask_events: Vec::new(),
            alerts: Vec::new(),
        }
    }
}

impl PolicyDocument {
    /// Fill in structure a partial document may be missing
    pub fn ensure_defaults(&mut self) {
        self.classes
            .entry(DEFAULT_CLASS_ID.to_string())
            .or_default();
    }

    #[must_use]
    pub fn default_class(&self) -> ClassPolicy {
        self.classes
            .get(DEFAULT_CLASS_ID)
            .cloned()
            .unwrap_or_default()
    }

    pub fn default_class_mut(&mut self) -> &mut ClassPolicy {
        self.classes
            .entry(DEFAULT_CLASS_ID.to_string())
            .or_default()
    }

    /// Append to the audit log, keeping the newest entries
    pub fn record_audit(&mut self, entry: AuditEntry) {
        self.audit.push(entry);
        keep_last(&mut self.audit, AUDIT_RETENTION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schedule_persisted_shape() {
        let schedule = Schedule {
            enabled: true,
            start: Some("08:00".to_string()),
            end: Some("15:00".to_string()),
            weekdays_only: true,
        };
        let value = serde_json::to_value(&schedule).unwrap();
        assert_eq!(
            value,
            json!({"enabled": true, "start": "08:00", "end": "15:00", "weekdays_only": true})
        );
    }

    #[test]
    fn test_schedule_from_malformed_json() {
        assert!(Schedule::from_json("not json").is_none());
        assert!(Schedule::from_json("[1,2]").is_none());
        assert!(Schedule::from_json("{}").is_none());
        assert!(Schedule::from_json("null").is_none());
    }

    #[test]
    fn test_schedule_from_value_is_lenient() {
        let schedule = Schedule::from_value(&json!({"enabled": 1, "start": 22})).unwrap();
        assert!(schedule.enabled);
        assert_eq!(schedule.start.as_deref(), Some("22"));
        assert!(schedule.end.is_none());
        assert!(!schedule.weekdays_only);
    }

    #[test]
    fn test_category_patch_distinguishes_null_from_absent() {
        let absent: CategoryPatch = serde_json::from_value(json!({"name": "Games"})).unwrap();
        assert!(absent.block_url.is_none());
        assert!(absent.schedule.is_none());

        let cleared: CategoryPatch =
            serde_json::from_value(json!({"name": "Games", "block_url": null, "schedule": null}))
                .unwrap();
        assert_eq!(cleared.block_url, Some(None));
        assert_eq!(cleared.schedule, Some(Value::Null));
    }

    #[test]
    fn test_category_names_contain_synthetic_categories() {
        assert_eq!(CATEGORY_NAMES.len(), 23);
        assert!(CATEGORY_NAMES.contains(&ALLOW_ONLY));
        assert!(CATEGORY_NAMES.contains(&GLOBAL_BLOCK_ALL));
        assert!(CATEGORY_NAMES.contains(&UNCATEGORIZED));
    }

    #[test]
    fn test_scene_kind_parse() {
        assert_eq!("allowed".parse::<SceneKind>(), Ok(SceneKind::Allowed));
        assert_eq!("Blocked".parse::<SceneKind>(), Ok(SceneKind::Blocked));
        assert!("focus".parse::<SceneKind>().is_err());
    }

    #[test]
    fn test_pending_command_flattens_payload() {
        let cmd = PendingCommand::notify("Hi", "Eyes up");
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value, json!({"type": "notify", "title": "Hi", "message": "Eyes up"}));

        let back = PendingCommand::from_value(value).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_pending_command_requires_type() {
        assert!(PendingCommand::from_value(json!({"title": "x"})).is_none());
        assert!(PendingCommand::from_value(json!({"type": ""})).is_none());
        assert!(PendingCommand::from_value(json!("policy_refresh")).is_none());
    }

    #[test]
    fn test_take_all_drains_student_queue_once() {
        let mut queues = CommandQueues::default();
        queues.push("alice", PendingCommand::policy_refresh(), 100);
        queues.push("bob", PendingCommand::notify("a", "b"), 100);

        let first = queues.take_all("alice", 101);
        assert_eq!(first, vec![PendingCommand::policy_refresh()]);
        assert!(queues.take_all("alice", 102).is_empty());
        assert_eq!(queues.pending_count("bob", 101), 1);
    }

    #[test]
    fn test_broadcast_delivered_once_per_student() {
        let mut queues = CommandQueues::default();
        queues.take_all("alice", 0);
        queues.take_all("bob", 0);
        queues.push(BROADCAST_TARGET, PendingCommand::policy_refresh(), 10);

        assert_eq!(queues.take_all("alice", 11).len(), 1);
        assert!(queues.take_all("alice", 12).is_empty());
        assert_eq!(queues.take_all("bob", 13).len(), 1);
        assert!(queues.take_all("bob", 14).is_empty());
    }

    #[test]
    fn test_first_poll_only_sees_recent_broadcasts() {
        let mut queues = CommandQueues::default();
        queues.push(BROADCAST_TARGET, PendingCommand::notify("old", "old"), 0);
        queues.push(BROADCAST_TARGET, PendingCommand::policy_refresh(), 1_000);

        let taken = queues.take_all("newcomer", 1_100);
        assert_eq!(taken, vec![PendingCommand::policy_refresh()]);
    }

    #[test]
    fn test_broadcast_log_is_bounded() {
        let mut queues = CommandQueues::default();
        for i in 0..250 {
            queues.push(BROADCAST_TARGET, PendingCommand::policy_refresh(), i);
        }
        assert_eq!(queues.broadcast.len(), 200);
        assert_eq!(queues.broadcast[0].seq, 51);
    }

    #[test]
    fn test_push_capped_keeps_newest() {
        let mut queues = CommandQueues::default();
        for i in 0..60 {
            queues.push_capped("alice", PendingCommand::new("open_tabs").with("n", i), 50);
        }
        let queue = &queues.per_student["alice"];
        assert_eq!(queue.len(), 50);
        assert_eq!(queue[0].payload["n"], json!(10));
    }

    #[test]
    fn test_document_defaults_from_partial_json() {
        let doc: PolicyDocument =
            serde_json::from_value(json!({"announcements": "Quiz today", "classes": {}})).unwrap();
        assert_eq!(doc.announcement, "Quiz today");
        assert!(doc.extension_enabled);

        let mut doc = doc;
        doc.ensure_defaults();
        let class = doc.default_class();
        assert_eq!(class.name, "Period 1");
        assert!(class.active);
    }

    #[test]
    fn test_audit_log_is_bounded() {
        let mut doc = PolicyDocument::default();
        for i in 0..510 {
            doc.record_audit(AuditEntry::new("tick", i));
        }
        assert_eq!(doc.audit.len(), 500);
        assert_eq!(doc.audit[0].ts, 10);
    }
}
