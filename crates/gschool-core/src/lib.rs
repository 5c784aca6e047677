pub mod admin;
pub mod api;
pub mod classifier;
pub mod classroom;
pub mod commands;
pub mod config;
pub mod decision;
pub mod error;
pub mod presence;
pub mod resolver;
pub mod scenes;
pub mod schedule;
pub mod signaling;

pub use admin::{
    ClassToggle, ClassUpdate, ClassView, ExamAction, PolicyAdmin, SettingsUpdate, TabAction,
    YoutubeRules,
};
pub use api::{
    CategoryUpdateRequest, ClassifyRequest, ClassifyResponse, ControlPlane, PolicyRequest,
};
pub use classifier::{Classifier, ClassifierResult, KeywordTable};
pub use commands::CommandQueue;
pub use config::{get_data_dir, AppConfig, DataPaths};
pub use decision::{BlockDecider, BlockDecision};
pub use error::PolicyError;
pub use presence::{
    AlertReport, EngagementReport, Heartbeat, HeartbeatResponse, PresenceTracker, Risk,
    StudentEngagement,
};
pub use resolver::{EffectivePolicy, PolicyResolver};
pub use scenes::{NewScene, SceneExport, SceneImport, SceneManager, SceneUpdate};
pub use signaling::{PresentationStore, Side};

/// Current unix time in seconds
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
