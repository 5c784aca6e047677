pub mod db;
pub mod document;
pub mod migrations;
pub mod models;
pub mod scenes;

pub use db::Database;
pub use document::PolicyStore;
pub use models::{
    keep_last, Alert, AttentionCheck, AttentionResponse, AuditEntry, BroadcastCommand, Category,
    CategoryPatch, ClassPolicy, CommandQueues, ExamState, ExamViolation, GlobalOverrides,
    GlobalSettings, OffTaskEvent, PendingCommand, Poll, PollResponse, PolicyDocument,
    PresenceRecord, RaisedHand, Scene, SceneKind, SceneRef, Schedule, ScreenshotEntry,
    StudentOverride, TimelineEntry, ALLOW_ONLY, BLOGS, BROADCAST_TARGET, CATEGORY_NAMES,
    DEFAULT_CLASS_ID, GENERAL_EDUCATION, GLOBAL_BLOCK_ALL, UNCATEGORIZED,
};
pub use scenes::{normalize_scene, SceneFile, SceneStore};
