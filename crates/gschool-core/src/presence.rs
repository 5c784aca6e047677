use anyhow::Result;
use gschool_storage::{
    keep_last, Alert, AuditEntry, OffTaskEvent, PolicyDocument, PolicyStore, PresenceRecord,
    SceneKind, SceneStore, ScreenshotEntry, TimelineEntry, BROADCAST_TARGET,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::classifier::{host_and_domain, normalize_url};
use crate::error::PolicyError;
use crate::unix_now;

const GUEST_TOKENS: [&str; 5] = ["guest", "anon", "anonymous", "trial", "temp"];

/// Same url is logged again after this many seconds
const TIMELINE_REPEAT_SECS: i64 = 15;
const TIMELINE_CAP: usize = 500;
const SHOT_LOG_PER_BEAT: usize = 10;
const SCREENSHOT_CAP: usize = 200;

const TIMELINE_LIMIT_DEFAULT: usize = 200;
const TIMELINE_LIMIT_MAX: usize = 1000;
const SCREENSHOT_LIMIT_DEFAULT: usize = 100;
const SCREENSHOT_LIMIT_MAX: usize = 500;

const OFFTASK_EVENT_CAP: usize = 2000;
const ALERT_CAP: usize = 500;
const ALERT_LIST_MAX: usize = 200;
/// Hosts that are off task no matter what the allowlist says
const DISTRACTION_KEYWORDS: [&str; 5] = ["coolmath", "roblox", "twitch", "steam", "epicgames"];
const DEFAULT_ALERT_KIND: &str = "off_task";

const ENGAGEMENT_WINDOW_DEFAULT: i64 = 1800;
const ENGAGEMENT_WINDOW_MIN: i64 = 60;
const ENGAGEMENT_WINDOW_MAX: i64 = 14_400;

/// Heartbeat body posted by a student extension
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Heartbeat {
    pub student: String,
    pub student_name: String,
    pub tab: Map<String, Value>,
    pub tabs: Vec<Value>,
    pub screenshot: String,
    pub tabshots: Map<String, Value>,
    pub shot_log: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ok: bool,
    pub server_time: i64,
    pub extension_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentTimelineEntry {
    pub student: String,
    #[serde(flatten)]
    pub entry: TimelineEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentScreenshot {
    pub student: String,
    #[serde(flatten)]
    pub entry: ScreenshotEntry,
}

/// Alert posted by an extension or a teacher tool
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlertReport {
    pub student: String,
    pub kind: Option<String>,
    pub score: Option<f64>,
    pub title: String,
    pub url: String,
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentEngagement {
    pub student: String,
    /// 1.0 minus the share of timeline entries that were off task
    pub engagement: f64,
    pub offtask_events: usize,
    pub alerts: usize,
    pub tabs_open: usize,
    pub last_seen: i64,
    pub risk: Risk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementReport {
    pub window: i64,
    pub since: i64,
    pub now: i64,
    pub students: Vec<StudentEngagement>,
}

/// Empty ids and guest-looking ids or names are never tracked
#[must_use]
pub fn is_guest_identity(student: &str, name: &str) -> bool {
    let student = student.trim().to_lowercase();
    let name = name.trim().to_lowercase();
    student.is_empty()
        || GUEST_TOKENS
            .iter()
            .any(|token| student.contains(token) || name.contains(token))
}

fn text_field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn tab_id_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Domain named by an allowlist entry: `*://*.example.com/*` or a bare host
fn allowed_domain(entry: &str) -> Option<String> {
    let entry = entry.trim().to_lowercase();
    if let Some(rest) = entry.strip_prefix("*://*.") {
        let domain = rest.strip_suffix("/*").unwrap_or(rest);
        return (!domain.is_empty() && !domain.contains('/')).then(|| domain.to_string());
    }
    (!entry.is_empty() && !entry.contains(|c| c == '*' || c == '/')).then_some(entry)
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Allowlist the student is held to: the current allow-only scene, else the class list
fn effective_allowlist(doc: &PolicyDocument, scenes: &SceneStore) -> Vec<String> {
    let file = scenes.load();
    match file.current_scene() {
        Some(scene) if scene.kind == SceneKind::Allowed => scene.allow.clone(),
        _ => doc.default_class().allowlist,
    }
}

fn is_on_task(url: &str, allowlist: &[String]) -> bool {
    let lowered = url.to_lowercase();
    if DISTRACTION_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        return false;
    }
    let (host, _) = host_and_domain(&normalize_url(url.trim()));
    !host.is_empty()
        && allowlist
            .iter()
            .filter_map(|entry| allowed_domain(entry))
            .any(|domain| host_matches(&host, &domain))
}

#[allow(clippy::cast_precision_loss)]
fn share(part: usize, whole: usize) -> f64 {
    part as f64 / whole as f64
}

fn risk_for(engagement: f64, offtask: usize, alerts: usize) -> Risk {
    if engagement < 0.4 || offtask >= 10 || alerts >= 5 {
        Risk::High
    } else if engagement < 0.6 || offtask >= 5 || alerts >= 3 {
        Risk::Medium
    } else {
        Risk::Low
    }
}

/// Presence, browsing timeline and screenshot history fed by heartbeats,
/// plus the off-task signals derived from them
pub struct PresenceTracker {
    store: Arc<PolicyStore>,
    scenes: Arc<SceneStore>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new(store: Arc<PolicyStore>, scenes: Arc<SceneStore>) -> Self {
        Self { store, scenes }
    }

    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn heartbeat(&self, beat: Heartbeat) -> Result<HeartbeatResponse> {
        self.heartbeat_at(beat, unix_now())
    }

    /// Record a heartbeat received at `now`.
    ///
    /// Guests get `extension_enabled = false` and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn heartbeat_at(&self, beat: Heartbeat, now: i64) -> Result<HeartbeatResponse> {
        let student = beat.student.trim().to_string();
        if is_guest_identity(&student, &beat.student_name) {
            log::debug!("Ignoring heartbeat from guest identity '{student}'");
            return Ok(HeartbeatResponse {
                ok: true,
                server_time: now,
                extension_enabled: false,
            });
        }

        let enabled = self.store.update(|doc| {
            let previous = doc.presence.remove(&student).unwrap_or_default();
            let record = build_record(previous, &beat, now);

            let url = text_field(&record.tab, "url");
            let timeline = doc.history.entry(student.clone()).or_default();
            let due = timeline
                .last()
                .map_or(true, |last| last.url != url || now - last.ts >= TIMELINE_REPEAT_SECS);
            if !url.is_empty() && due {
                timeline.push(TimelineEntry {
                    ts: now,
                    title: text_field(&record.tab, "title"),
                    url,
                    fav_icon_url: record
                        .tab
                        .get("favIconUrl")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
                keep_last(timeline, TIMELINE_CAP);
            }
            if timeline.is_empty() {
                doc.history.remove(&student);
            }

            if !beat.shot_log.is_empty() {
                let shots = doc.screenshots.entry(student.clone()).or_default();
                for shot in beat.shot_log.iter().take(SHOT_LOG_PER_BEAT) {
                    let Some(shot) = shot.as_object() else {
                        continue;
                    };
                    shots.push(ScreenshotEntry {
                        ts: now,
                        tab_id: shot.get("tabId").cloned(),
                        data_url: shot.get("dataUrl").and_then(Value::as_str).map(str::to_string),
                        title: text_field(shot, "title"),
                        url: text_field(shot, "url"),
                    });
                }
                keep_last(shots, SCREENSHOT_CAP);
            }

            doc.presence.insert(student.clone(), record);
            Ok(doc.extension_enabled)
        })?;

        Ok(HeartbeatResponse {
            ok: true,
            server_time: now,
            extension_enabled: enabled,
        })
    }

    #[must_use]
    pub fn presence(&self) -> BTreeMap<String, PresenceRecord> {
        self.store.load().presence
    }

    /// Timeline entries at or after `since`.
    ///
    /// For one student: oldest first. Across students: newest first. Only the
    /// most recent `limit` entries (default 200, at most 1000) are returned.
    #[must_use]
    pub fn timeline(
        &self,
        student: Option<&str>,
        since: i64,
        limit: Option<usize>,
    ) -> Vec<StudentTimelineEntry> {
        let limit = limit
            .unwrap_or(TIMELINE_LIMIT_DEFAULT)
            .clamp(1, TIMELINE_LIMIT_MAX);
        let history = self.store.load().history;
        let tag = |student: &str, entry: TimelineEntry| StudentTimelineEntry {
            student: student.to_string(),
            entry,
        };

        match student.map(str::trim).filter(|s| !s.is_empty()) {
            Some(student) => {
                let mut items: Vec<_> = history
                    .get(student)
                    .into_iter()
                    .flatten()
                    .filter(|e| e.ts >= since)
                    .map(|e| tag(student, e.clone()))
                    .collect();
                items.sort_by_key(|item| item.entry.ts);
                let skip = items.len().saturating_sub(limit);
                items.split_off(skip)
            }
            None => {
                let mut items: Vec<_> = history
                    .into_iter()
                    .flat_map(|(student, entries)| {
                        entries
                            .into_iter()
                            .filter(|e| e.ts >= since)
                            .map(move |e| tag(&student, e))
                    })
                    .collect();
                items.sort_by_key(|item| std::cmp::Reverse(item.entry.ts));
                items.truncate(limit);
                items
            }
        }
    }

    /// Screenshot history; same ordering rules as [`Self::timeline`] (default 100, at most 500)
    #[must_use]
    pub fn screenshots(
        &self,
        student: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<StudentScreenshot> {
        let limit = limit
            .unwrap_or(SCREENSHOT_LIMIT_DEFAULT)
            .clamp(1, SCREENSHOT_LIMIT_MAX);
        let screenshots = self.store.load().screenshots;

        match student.map(str::trim).filter(|s| !s.is_empty()) {
            Some(student) => {
                let mut items: Vec<_> = screenshots
                    .get(student)
                    .into_iter()
                    .flatten()
                    .map(|entry| StudentScreenshot {
                        student: student.to_string(),
                        entry: entry.clone(),
                    })
                    .collect();
                let skip = items.len().saturating_sub(limit);
                items.split_off(skip)
            }
            None => {
                let mut items: Vec<_> = screenshots
                    .into_iter()
                    .flat_map(|(student, entries)| {
                        entries.into_iter().map(move |entry| StudentScreenshot {
                            student: student.clone(),
                            entry,
                        })
                    })
                    .collect();
                items.sort_by_key(|item| std::cmp::Reverse(item.entry.ts));
                items.truncate(limit);
                items
            }
        }
    }

    // ---- off-task signals ----

    /// # Errors
    ///
    /// Returns `PolicyError::MissingField` for an empty student or url
    pub fn check_off_task(&self, student: &str, url: &str) -> Result<bool> {
        self.check_off_task_at(student, url, unix_now())
    }

    /// Judge `url` against the student's allowlist and log the outcome.
    ///
    /// A host is on task when it matches an allowlisted domain; URLs naming a
    /// known distraction are always off task.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::MissingField` for an empty student or url
    pub fn check_off_task_at(&self, student: &str, url: &str, now: i64) -> Result<bool> {
        let student = student.trim();
        if student.is_empty() {
            return Err(PolicyError::MissingField("student").into());
        }
        if url.trim().is_empty() {
            return Err(PolicyError::MissingField("url").into());
        }

        let on_task = self.store.update(|doc| {
            let on_task = is_on_task(url, &effective_allowlist(doc, &self.scenes));
            doc.offtask_events.push(OffTaskEvent {
                student: student.to_string(),
                url: url.to_string(),
                ts: now,
                on_task,
            });
            keep_last(&mut doc.offtask_events, OFFTASK_EVENT_CAP);
            Ok(on_task)
        })?;
        if !on_task {
            log::info!("Off task: {student} on {url}");
        }
        Ok(on_task)
    }

    /// # Errors
    ///
    /// Returns `PolicyError::MissingField` for an empty student id
    pub fn raise_alert(&self, report: AlertReport) -> Result<Alert> {
        self.raise_alert_at(report, unix_now())
    }

    /// # Errors
    ///
    /// Returns `PolicyError::MissingField` for an empty student id
    pub fn raise_alert_at(&self, report: AlertReport, now: i64) -> Result<Alert> {
        let student = report.student.trim().to_string();
        if student.is_empty() {
            return Err(PolicyError::MissingField("student").into());
        }
        let alert = Alert {
            ts: now,
            student,
            kind: report
                .kind
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| DEFAULT_ALERT_KIND.to_string()),
            score: report.score.filter(|s| s.is_finite()).unwrap_or(0.0),
            title: report.title,
            url: report.url,
            note: report.note,
        };
        self.store.update(|doc| {
            doc.alerts.push(alert.clone());
            keep_last(&mut doc.alerts, ALERT_CAP);
            doc.record_audit(
                AuditEntry::new("alert", now)
                    .with("student", alert.student.as_str())
                    .with("kind", alert.kind.as_str())
                    .with("score", alert.score),
            );
            Ok(())
        })?;
        Ok(alert)
    }

    /// Newest alerts (at most 200), oldest first
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        let mut alerts = self.store.load().alerts;
        let skip = alerts.len().saturating_sub(ALERT_LIST_MAX);
        alerts.split_off(skip)
    }

    /// Clear one student's alerts, or all of them
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn clear_alerts(&self, student: Option<&str>) -> Result<()> {
        let student = student.map(str::trim).filter(|s| !s.is_empty());
        self.store.update(|doc| {
            match student {
                Some(student) => doc.alerts.retain(|a| a.student != student),
                None => doc.alerts.clear(),
            }
            doc.record_audit(
                AuditEntry::new("alerts_clear", unix_now())
                    .with("student", student.unwrap_or(BROADCAST_TARGET)),
            );
            Ok(())
        })
    }

    #[must_use]
    pub fn engagement(&self, window: Option<i64>) -> EngagementReport {
        self.engagement_at(window, unix_now())
    }

    /// Per-student engagement over the last `window` seconds (default 1800,
    /// clamped to 60..=14400).
    ///
    /// Students are everyone with presence plus anyone with timeline entries in
    /// the window. Without timeline entries a student scores 1.0.
    #[must_use]
    pub fn engagement_at(&self, window: Option<i64>, now: i64) -> EngagementReport {
        let window = window
            .unwrap_or(ENGAGEMENT_WINDOW_DEFAULT)
            .clamp(ENGAGEMENT_WINDOW_MIN, ENGAGEMENT_WINDOW_MAX);
        let since = now - window;
        let doc = self.store.load();

        let mut students: BTreeSet<&str> = doc.presence.keys().map(String::as_str).collect();
        students.extend(
            doc.history
                .iter()
                .filter(|(_, entries)| entries.iter().any(|e| e.ts >= since))
                .map(|(student, _)| student.as_str()),
        );

        let students = students
            .into_iter()
            .filter(|student| !student.is_empty())
            .map(|student| {
                let events = doc
                    .history
                    .get(student)
                    .map_or(0, |entries| entries.iter().filter(|e| e.ts >= since).count());
                let offtask = doc
                    .offtask_events
                    .iter()
                    .filter(|e| e.student == student && e.ts >= since && !e.on_task)
                    .count();
                let alerts = doc
                    .alerts
                    .iter()
                    .filter(|a| a.student == student && a.ts >= since)
                    .count();
                let engagement = if events > 0 {
                    (1.0 - share(offtask, events)).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                let presence = doc.presence.get(student);
                StudentEngagement {
                    student: student.to_string(),
                    engagement,
                    offtask_events: offtask,
                    alerts,
                    tabs_open: presence.map_or(0, |p| p.tabs.len()),
                    last_seen: presence.map_or(0, |p| p.last_seen),
                    risk: risk_for(engagement, offtask, alerts),
                }
            })
            .collect();

        EngagementReport {
            window,
            since,
            now,
            students,
        }
    }
}

fn build_record(previous: PresenceRecord, beat: &Heartbeat, now: i64) -> PresenceRecord {
    let mut tab = beat.tab.clone();
    if !tab.contains_key("favIconUrl") {
        if let Some(favicon) = tab.get("favicon").cloned() {
            tab.insert("favIconUrl".to_string(), favicon);
        }
    }

    let open_ids: HashSet<String> = beat
        .tabs
        .iter()
        .filter_map(|t| t.get("id"))
        .filter_map(tab_id_key)
        .collect();
    let mut tabshots = previous.tabshots;
    tabshots.extend(beat.tabshots.iter().map(|(k, v)| (k.clone(), v.clone())));
    tabshots.retain(|id, _| open_ids.contains(id));

    PresenceRecord {
        last_seen: now,
        student_name: beat.student_name.clone(),
        tab,
        tabs: beat.tabs.clone(),
        screenshot: beat.screenshot.clone(),
        tabshots,
    }
}
