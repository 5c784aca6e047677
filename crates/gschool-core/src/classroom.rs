use anyhow::Result;
use gschool_storage::{
    keep_last, AttentionCheck, AttentionResponse, AuditEntry, ExamViolation, PendingCommand, Poll,
    PollResponse, RaisedHand, BROADCAST_TARGET,
};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::admin::PolicyAdmin;
use crate::error::PolicyError;
use crate::unix_now;

const VIOLATION_CAP: usize = 500;
const VIOLATION_LIST_MAX: usize = 200;
const RAISE_CAP: usize = 200;

const DEFAULT_VIOLATION_REASON: &str = "tab_violation";
const DEFAULT_ATTENTION_TITLE: &str = "Are you paying attention?";
const DEFAULT_ATTENTION_TIMEOUT: u32 = 30;

fn required<'a>(value: &'a str, field: &'static str) -> Result<&'a str, PolicyError> {
    let value = value.trim();
    if value.is_empty() {
        Err(PolicyError::MissingField(field))
    } else {
        Ok(value)
    }
}

fn newest<T>(mut list: Vec<T>, limit: usize) -> Vec<T> {
    let skip = list.len().saturating_sub(limit);
    list.split_off(skip)
}

/// Live classroom interactions: exam violations, attention checks, polls and raised hands
impl PolicyAdmin {
    // ---- exam violations ----

    /// Log a violation reported while exam mode is on
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::MissingField` for an empty student id
    pub fn record_exam_violation(
        &self,
        student: &str,
        url: &str,
        reason: Option<&str>,
    ) -> Result<ExamViolation> {
        let student = required(student, "student")?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_VIOLATION_REASON);
        let audit = AuditEntry::new("exam_violation", unix_now())
            .with("student", student)
            .with("reason", reason);
        let violation = self.mutate(audit, false, |doc, now| {
            let violation = ExamViolation {
                ts: now,
                student: student.to_string(),
                url: url.trim().to_string(),
                reason: reason.to_string(),
            };
            doc.exam_violations.push(violation.clone());
            keep_last(&mut doc.exam_violations, VIOLATION_CAP);
            Ok(violation)
        })?;
        log::warn!("Exam violation by {student}: {reason}");
        Ok(violation)
    }

    /// Newest violations (at most 200), oldest first
    #[must_use]
    pub fn exam_violations(&self) -> Vec<ExamViolation> {
        newest(self.document().exam_violations, VIOLATION_LIST_MAX)
    }

    /// Clear one student's violations, or all of them
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn clear_exam_violations(&self, student: Option<&str>) -> Result<()> {
        let student = student.map(str::trim).filter(|s| !s.is_empty());
        let audit = AuditEntry::new("exam_violations_clear", unix_now())
            .with("student", student.unwrap_or(BROADCAST_TARGET));
        self.mutate(audit, false, |doc, _| {
            match student {
                Some(student) => doc.exam_violations.retain(|v| v.student != student),
                None => doc.exam_violations.clear(),
            }
            Ok(())
        })
    }

    // ---- attention checks ----

    /// Replace the current attention check and broadcast it
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn start_attention_check(
        &self,
        title: Option<&str>,
        timeout: Option<u32>,
    ) -> Result<AttentionCheck> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_ATTENTION_TITLE)
            .to_string();
        let timeout = timeout.unwrap_or(DEFAULT_ATTENTION_TIMEOUT);
        let audit =
            AuditEntry::new("attention_check_start", unix_now()).with("title", title.as_str());
        self.mutate(audit, false, |doc, now| {
            let check = AttentionCheck {
                title: title.clone(),
                timeout,
                ts: now,
                responses: BTreeMap::new(),
            };
            doc.attention_check = Some(check.clone());
            doc.commands.push(
                BROADCAST_TARGET,
                PendingCommand::new("attention_check")
                    .with("title", title)
                    .with("timeout", timeout),
                now,
            );
            Ok(check)
        })
    }

    /// Record a student's reply; a later reply replaces an earlier one
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::NoActiveCheck` when no check was started, or
    /// `PolicyError::MissingField` for an empty student id
    pub fn attention_response(&self, student: &str, response: &str) -> Result<()> {
        let student = required(student, "student")?;
        let audit = AuditEntry::new("attention_response", unix_now())
            .with("student", student)
            .with("response", response);
        self.mutate(audit, false, |doc, now| {
            let check = doc
                .attention_check
                .as_mut()
                .ok_or(PolicyError::NoActiveCheck)?;
            check.responses.insert(
                student.to_string(),
                AttentionResponse {
                    response: response.to_string(),
                    ts: now,
                },
            );
            Ok(())
        })
    }

    #[must_use]
    pub fn attention_results(&self) -> Option<AttentionCheck> {
        self.document().attention_check
    }

    // ---- polls ----

    /// Create a poll and broadcast it; returns the poll id
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::MissingField` without a question or a non-empty option
    pub fn create_poll(&self, question: &str, options: Vec<String>) -> Result<String> {
        let question = required(question, "question")?.to_string();
        let options: Vec<String> = options
            .into_iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        if options.is_empty() {
            return Err(PolicyError::MissingField("options").into());
        }

        let mut stamp = chrono::Utc::now().timestamp_millis();
        let audit =
            AuditEntry::new("poll_create", unix_now()).with("question", question.as_str());
        let id = self.mutate(audit, false, |doc, now| {
            let mut id = format!("poll_{stamp}");
            while doc.polls.contains_key(&id) {
                stamp += 1;
                id = format!("poll_{stamp}");
            }
            doc.commands.push(
                BROADCAST_TARGET,
                PendingCommand::new("poll")
                    .with("id", id.as_str())
                    .with("question", question.as_str())
                    .with("options", options.clone()),
                now,
            );
            doc.polls.insert(
                id.clone(),
                Poll {
                    question,
                    options,
                    created: now,
                    responses: Vec::new(),
                },
            );
            Ok(id)
        })?;
        log::info!("Poll created: {id}");
        Ok(id)
    }

    /// Append a student's answer to a poll
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::MissingField` for an empty poll id or
    /// `PolicyError::PollNotFound` for an unknown one
    pub fn poll_response(&self, poll_id: &str, student: &str, answer: Value) -> Result<()> {
        let poll_id = required(poll_id, "poll_id")?;
        let student = student.trim();
        let audit = AuditEntry::new("poll_response", unix_now())
            .with("poll_id", poll_id)
            .with("student", student);
        self.mutate(audit, false, |doc, now| {
            let poll = doc
                .polls
                .get_mut(poll_id)
                .ok_or_else(|| PolicyError::PollNotFound(poll_id.to_string()))?;
            poll.responses.push(PollResponse {
                student: student.to_string(),
                answer,
                ts: now,
            });
            Ok(())
        })
    }

    #[must_use]
    pub fn polls(&self) -> BTreeMap<String, Poll> {
        self.document().polls
    }

    // ---- raised hands ----

    /// # Errors
    ///
    /// Returns `PolicyError::MissingField` for an empty student id
    pub fn raise_hand(&self, student: &str, note: &str) -> Result<RaisedHand> {
        let student = required(student, "student")?;
        let audit = AuditEntry::new("raise_hand", unix_now()).with("student", student);
        self.mutate(audit, false, |doc, now| {
            let hand = RaisedHand {
                student: student.to_string(),
                note: note.trim().to_string(),
                ts: now,
            };
            doc.raises.push(hand.clone());
            keep_last(&mut doc.raises, RAISE_CAP);
            Ok(hand)
        })
    }

    /// Raised hands in the order they went up
    #[must_use]
    pub fn hands(&self) -> Vec<RaisedHand> {
        self.document().raises
    }

    /// Lower one student's hand, or every hand; returns how many remain
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn clear_hands(&self, student: Option<&str>) -> Result<usize> {
        let student = student.map(str::trim).filter(|s| !s.is_empty());
        let audit = AuditEntry::new("raise_hand_clear", unix_now())
            .with("student", student.unwrap_or(BROADCAST_TARGET));
        self.mutate(audit, false, |doc, _| {
            match student {
                Some(student) => doc.raises.retain(|r| r.student != student),
                None => doc.raises.clear(),
            }
            Ok(doc.raises.len())
        })
    }
}
