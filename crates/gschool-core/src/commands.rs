use anyhow::Result;
use gschool_storage::{PendingCommand, PolicyStore};
use std::sync::Arc;

/// Commands per student for tab actions are capped at this many
pub const TAB_COMMAND_CAP: usize = 50;

/// One-shot command delivery backed by the policy document.
///
/// Each push or take is a single locked read-modify-write of the document.
pub struct CommandQueue {
    store: Arc<PolicyStore>,
}

impl CommandQueue {
    #[must_use]
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    /// Queue for a student, or for everyone when `target` is `*` or empty
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn push(&self, target: &str, command: PendingCommand) -> Result<()> {
        let now = crate::unix_now();
        log::debug!("Queued '{}' for {}", command.kind, display_target(target));
        self.store
            .update(|doc| {
                doc.commands.push(target, command, now);
                Ok(())
            })
    }

    /// Everything this student has not received yet; delivered at most once
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be saved
    pub fn take_all(&self, student: &str) -> Result<Vec<PendingCommand>> {
        let student = student.trim();
        if student.is_empty() {
            return Ok(Vec::new());
        }
        let now = crate::unix_now();
        self.store
            .update(|doc| Ok(doc.commands.take_all(student, now)))
    }

    /// Number of commands waiting for a student, without consuming them
    #[must_use]
    pub fn pending_count(&self, student: &str) -> usize {
        let now = crate::unix_now();
        self.store.load().commands.pending_count(student.trim(), now)
    }
}

pub(crate) fn display_target(target: &str) -> &str {
    let target = target.trim();
    if target.is_empty() {
        gschool_storage::BROADCAST_TARGET
    } else {
        target
    }
}
