mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gschool_core::{
    config::get_data_dir, AlertReport, ClassUpdate, ControlPlane, NewScene, SceneUpdate,
    SettingsUpdate, YoutubeRules,
};
use gschool_storage::GlobalOverrides;
use std::path::PathBuf;

use commands::categories::CategorySetArgs;

#[derive(Parser)]
#[command(name = "gschool")]
#[command(about = "Classroom content-filtering control plane", long_about = None)]
struct Cli {
    /// Data directory (defaults to $GSCHOOL_DATA_DIR or the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify a URL into a content category
    Classify {
        url: String,
        /// Classify this HTML instead of fetching the page
        #[arg(long)]
        html_file: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Decide whether a URL is blocked right now
    Decide {
        url: String,
        #[arg(long)]
        html_file: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Resolve the effective policy for a student (drains pending commands)
    Policy {
        #[arg(default_value = "")]
        student: String,
    },
    /// Category flags and schedules
    Categories {
        #[command(subcommand)]
        action: CategoryAction,
    },
    /// Scene presets
    Scene {
        #[command(subcommand)]
        action: SceneAction,
    },
    /// Class session settings
    Class {
        #[command(subcommand)]
        action: ClassAction,
    },
    /// Per-student overrides
    Student {
        #[command(subcommand)]
        action: StudentAction,
    },
    /// Queue raw commands for extensions
    Command {
        #[command(subcommand)]
        action: CommandAction,
    },
    /// Open, restore or close student tabs
    Tabs {
        #[command(subcommand)]
        action: TabsAction,
    },
    /// Set the class announcement (empty text clears it)
    Announce { text: String },
    /// Send a notification to every student
    Notify {
        message: String,
        #[arg(short, long)]
        title: Option<String>,
    },
    /// Exam mode
    Exam {
        #[command(subcommand)]
        action: ExamCommand,
    },
    /// Global settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// YouTube filtering rules
    Youtube {
        #[command(subcommand)]
        action: YoutubeAction,
    },
    /// Site-wide allowlist and teacher blocks
    Overrides {
        #[command(subcommand)]
        action: OverridesAction,
    },
    /// Show or set the Google doodle block flag
    Doodles { enabled: Option<bool> },
    /// Enable or disable every student extension
    Extension {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Record a student heartbeat (JSON inline or @file)
    Heartbeat { body: String },
    /// Latest heartbeat per student
    Presence,
    /// Browsing timeline
    Timeline {
        #[arg(short, long)]
        student: Option<String>,
        /// Only entries at or after this unix timestamp
        #[arg(long, default_value = "0")]
        since: i64,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Exam tab violations
    Violations {
        #[command(subcommand)]
        action: ViolationAction,
    },
    /// Attention checks
    Attention {
        #[command(subcommand)]
        action: AttentionAction,
    },
    /// Class polls
    Poll {
        #[command(subcommand)]
        action: PollAction,
    },
    /// Raised-hand queue
    Hand {
        #[command(subcommand)]
        action: HandAction,
    },
    /// Judge a URL against the student's allowlist and log the result
    Offtask { student: String, url: String },
    /// Off-task alerts
    Alerts {
        #[command(subcommand)]
        action: AlertAction,
    },
    /// Per-student engagement scores
    Engagement {
        /// Window in seconds (60 to 14400)
        #[arg(short, long)]
        window: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// ICE servers offered to presentation clients
    IceServers,
    /// Recent admin actions
    Audit {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum CategoryAction {
    /// List categories with their flags and schedules
    List,
    /// Update one category; only given options change
    Set {
        name: String,
        #[arg(long)]
        blocked: Option<bool>,
        #[arg(long, conflicts_with = "clear_block_url")]
        block_url: Option<String>,
        #[arg(long)]
        clear_block_url: bool,
        /// Schedule JSON, e.g. '{"enabled":true,"start":"08:00","end":"15:00"}'
        #[arg(long, conflicts_with = "clear_schedule")]
        schedule: Option<String>,
        #[arg(long)]
        clear_schedule: bool,
    },
}

#[derive(Subcommand, Debug)]
enum SceneAction {
    List {
        #[arg(long)]
        json: bool,
    },
    Create {
        name: String,
        /// allowed or blocked
        #[arg(short = 't', long = "type", default_value = "blocked")]
        kind: String,
        #[arg(long)]
        allow: Vec<String>,
        #[arg(long)]
        block: Vec<String>,
        #[arg(long)]
        icon: Option<String>,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(short = 't', long = "type")]
        kind: Option<String>,
        /// Replaces the allow list
        #[arg(long)]
        allow: Option<Vec<String>>,
        /// Replaces the block list
        #[arg(long)]
        block: Option<Vec<String>>,
        #[arg(long)]
        icon: Option<String>,
    },
    Delete {
        id: String,
    },
    Apply {
        id: String,
    },
    Clear,
    Export {
        id: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import `{"scene": ...}` or `{"scenes": ...}` (JSON inline or @file)
    Import {
        payload: String,
    },
}

#[derive(Subcommand, Debug)]
enum ClassAction {
    Show,
    Set {
        #[arg(long)]
        teacher_blocks: Option<Vec<String>>,
        #[arg(long)]
        allowlist: Option<Vec<String>>,
        #[arg(long)]
        chat: Option<bool>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        passcode: Option<String>,
    },
    /// Flip focus_mode or paused for the whole class
    Toggle {
        key: String,
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
}

#[derive(Subcommand, Debug)]
enum StudentAction {
    Set {
        student: String,
        #[arg(long)]
        focus_mode: Option<bool>,
        #[arg(long)]
        paused: Option<bool>,
    },
}

#[derive(Subcommand, Debug)]
enum CommandAction {
    /// Queue a command (JSON with a "type"); everyone unless --target is given
    Push {
        command: String,
        #[arg(long)]
        target: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum TabsAction {
    Open {
        #[arg(required = true)]
        urls: Vec<String>,
        #[arg(short, long)]
        student: Option<String>,
    },
    Restore { student: String },
    Close { student: String },
}

#[derive(Subcommand, Debug)]
enum ExamCommand {
    Start { url: String },
    End,
}

#[derive(Subcommand, Debug)]
enum ViolationAction {
    List {
        #[arg(long)]
        json: bool,
    },
    Record {
        student: String,
        url: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Clear one student's violations, or all of them
    Clear { student: Option<String> },
}

#[derive(Subcommand, Debug)]
enum AttentionAction {
    Start {
        #[arg(short, long)]
        title: Option<String>,
        /// Seconds students have to respond
        #[arg(long)]
        timeout: Option<u32>,
    },
    Respond { student: String, response: String },
    Results {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PollAction {
    Create {
        question: String,
        #[arg(required = true)]
        options: Vec<String>,
    },
    /// Record an answer (JSON, or plain text)
    Respond {
        poll_id: String,
        answer: String,
        #[arg(short, long, default_value = "")]
        student: String,
    },
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum HandAction {
    Raise {
        student: String,
        #[arg(default_value = "")]
        note: String,
    },
    List,
    /// Lower one student's hand, or every hand
    Clear { student: Option<String> },
}

#[derive(Subcommand, Debug)]
enum AlertAction {
    List {
        #[arg(long)]
        json: bool,
    },
    Raise {
        student: String,
        #[arg(short, long)]
        kind: Option<String>,
        #[arg(long)]
        score: Option<f64>,
        #[arg(long, default_value = "")]
        url: String,
        #[arg(long, default_value = "")]
        note: String,
    },
    Clear { student: Option<String> },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Get,
    Set {
        #[arg(long)]
        blocked_redirect: Option<String>,
        #[arg(long)]
        chat: Option<bool>,
        #[arg(long)]
        passcode: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum YoutubeAction {
    Show,
    Set {
        #[arg(long)]
        block_keyword: Vec<String>,
        #[arg(long)]
        block_channel: Vec<String>,
        #[arg(long)]
        allow: Vec<String>,
        /// Only allowed videos play
        #[arg(long)]
        allow_mode: bool,
    },
}

#[derive(Subcommand, Debug)]
enum OverridesAction {
    Show,
    /// Replace both lists
    Set {
        #[arg(long)]
        allow: Vec<String>,
        #[arg(long)]
        block: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => get_data_dir()?,
    };
    log::debug!("Using data dir {}", data_dir.display());
    let plane = ControlPlane::open(&data_dir)?;

    match cli.command {
        Commands::Classify {
            url,
            html_file,
            json,
        } => commands::classify::handle_classify(&plane, url, html_file.as_deref(), json).await,
        Commands::Decide {
            url,
            html_file,
            json,
        } => commands::classify::handle_decide(&plane, url, html_file.as_deref(), json).await,
        Commands::Policy { student } => commands::classify::handle_policy(&plane, student),
        Commands::Categories { action } => run_categories(&plane, action),
        Commands::Scene { action } => run_scene(&plane, action),
        Commands::Class { action } => match action {
            ClassAction::Show => commands::class::handle_class_show(&plane),
            ClassAction::Set {
                teacher_blocks,
                allowlist,
                chat,
                active,
                passcode,
            } => commands::class::handle_class_set(
                &plane,
                ClassUpdate {
                    teacher_blocks,
                    allowlist,
                    chat_enabled: chat,
                    active,
                    passcode,
                },
            ),
            ClassAction::Toggle { key, value } => {
                commands::class::handle_class_toggle(&plane, &key, value)
            }
        },
        Commands::Student {
            action:
                StudentAction::Set {
                    student,
                    focus_mode,
                    paused,
                },
        } => commands::class::handle_student_set(&plane, &student, focus_mode, paused),
        Commands::Command {
            action: CommandAction::Push { command, target },
        } => commands::admin::handle_command_push(&plane, target.as_deref(), &command),
        Commands::Tabs { action } => match action {
            TabsAction::Open { urls, student } => {
                commands::admin::handle_tabs_open(&plane, student.as_deref(), urls)
            }
            TabsAction::Restore { student } => {
                commands::admin::handle_tabs_action(&plane, &student, "restore_tabs")
            }
            TabsAction::Close { student } => {
                commands::admin::handle_tabs_action(&plane, &student, "close_tabs")
            }
        },
        Commands::Announce { text } => commands::admin::handle_announce(&plane, &text),
        Commands::Notify { message, title } => {
            commands::admin::handle_notify(&plane, title.as_deref(), &message)
        }
        Commands::Exam { action } => match action {
            ExamCommand::Start { url } => {
                commands::admin::handle_exam(&plane, "start", Some(url.as_str()))
            }
            ExamCommand::End => commands::admin::handle_exam(&plane, "end", None),
        },
        Commands::Settings { action } => match action {
            SettingsAction::Get => commands::admin::handle_settings_get(&plane),
            SettingsAction::Set {
                blocked_redirect,
                chat,
                passcode,
            } => commands::admin::handle_settings_set(
                &plane,
                SettingsUpdate {
                    blocked_redirect,
                    chat_enabled: chat,
                    passcode,
                },
            ),
        },
        Commands::Youtube { action } => match action {
            YoutubeAction::Show => commands::admin::handle_youtube_show(&plane),
            YoutubeAction::Set {
                block_keyword,
                block_channel,
                allow,
                allow_mode,
            } => commands::admin::handle_youtube_set(
                &plane,
                YoutubeRules {
                    block_keywords: block_keyword,
                    block_channels: block_channel,
                    allow,
                    allow_mode,
                },
            ),
        },
        Commands::Overrides { action } => match action {
            OverridesAction::Show => commands::admin::handle_overrides_show(&plane),
            OverridesAction::Set { allow, block } => commands::admin::handle_overrides_set(
                &plane,
                GlobalOverrides {
                    allowlist: allow,
                    teacher_blocks: block,
                },
            ),
        },
        Commands::Doodles { enabled } => commands::admin::handle_doodles(&plane, enabled),
        Commands::Extension { enabled } => commands::admin::handle_extension(&plane, enabled),
        Commands::Heartbeat { body } => commands::presence::handle_heartbeat(&plane, &body),
        Commands::Presence => commands::presence::handle_presence(&plane),
        Commands::Timeline {
            student,
            since,
            limit,
            json,
        } => commands::presence::handle_timeline(&plane, student.as_deref(), since, limit, json),
        Commands::Violations { action } => match action {
            ViolationAction::List { json } => {
                commands::classroom::handle_violations_list(&plane, json)
            }
            ViolationAction::Record {
                student,
                url,
                reason,
            } => commands::classroom::handle_violation_record(
                &plane,
                &student,
                &url,
                reason.as_deref(),
            ),
            ViolationAction::Clear { student } => {
                commands::classroom::handle_violations_clear(&plane, student.as_deref())
            }
        },
        Commands::Attention { action } => match action {
            AttentionAction::Start { title, timeout } => {
                commands::classroom::handle_attention_start(&plane, title.as_deref(), timeout)
            }
            AttentionAction::Respond { student, response } => {
                commands::classroom::handle_attention_respond(&plane, &student, &response)
            }
            AttentionAction::Results { json } => {
                commands::classroom::handle_attention_results(&plane, json)
            }
        },
        Commands::Poll { action } => match action {
            PollAction::Create { question, options } => {
                commands::classroom::handle_poll_create(&plane, &question, options)
            }
            PollAction::Respond {
                poll_id,
                answer,
                student,
            } => commands::classroom::handle_poll_respond(&plane, &poll_id, &student, &answer),
            PollAction::List { json } => commands::classroom::handle_poll_list(&plane, json),
        },
        Commands::Hand { action } => match action {
            HandAction::Raise { student, note } => {
                commands::classroom::handle_hand_raise(&plane, &student, &note)
            }
            HandAction::List => commands::classroom::handle_hands_list(&plane),
            HandAction::Clear { student } => {
                commands::classroom::handle_hands_clear(&plane, student.as_deref())
            }
        },
        Commands::Offtask { student, url } => {
            commands::classroom::handle_offtask_check(&plane, &student, &url)
        }
        Commands::Alerts { action } => match action {
            AlertAction::List { json } => commands::classroom::handle_alerts_list(&plane, json),
            AlertAction::Raise {
                student,
                kind,
                score,
                url,
                note,
            } => commands::classroom::handle_alert_raise(
                &plane,
                AlertReport {
                    student,
                    kind,
                    score,
                    url,
                    note,
                    ..AlertReport::default()
                },
            ),
            AlertAction::Clear { student } => {
                commands::classroom::handle_alerts_clear(&plane, student.as_deref())
            }
        },
        Commands::Engagement { window, json } => {
            commands::classroom::handle_engagement(&plane, window, json)
        }
        Commands::IceServers => commands::presence::handle_ice_servers(&plane),
        Commands::Audit { limit } => commands::admin::handle_audit(&plane, limit),
    }
}

fn run_categories(plane: &ControlPlane, action: CategoryAction) -> Result<()> {
    match action {
        CategoryAction::List => commands::categories::handle_categories_list(plane),
        CategoryAction::Set {
            name,
            blocked,
            block_url,
            clear_block_url,
            schedule,
            clear_schedule,
        } => commands::categories::handle_categories_set(
            plane,
            CategorySetArgs {
                name,
                blocked,
                block_url,
                clear_block_url,
                schedule,
                clear_schedule,
            },
        ),
    }
}

fn run_scene(plane: &ControlPlane, action: SceneAction) -> Result<()> {
    match action {
        SceneAction::List { json } => commands::scene::handle_scene_list(plane, json),
        SceneAction::Create {
            name,
            kind,
            allow,
            block,
            icon,
        } => commands::scene::handle_scene_create(
            plane,
            NewScene {
                name,
                kind,
                allow,
                block,
                icon,
            },
        ),
        SceneAction::Update {
            id,
            name,
            kind,
            allow,
            block,
            icon,
        } => commands::scene::handle_scene_update(
            plane,
            &id,
            SceneUpdate {
                name,
                kind,
                allow,
                block,
                icon,
            },
        ),
        SceneAction::Delete { id } => commands::scene::handle_scene_delete(plane, &id),
        SceneAction::Apply { id } => commands::scene::handle_scene_apply(plane, &id),
        SceneAction::Clear => commands::scene::handle_scene_clear(plane),
        SceneAction::Export { id, output } => {
            commands::scene::handle_scene_export(plane, id.as_deref(), output.as_deref())
        }
        SceneAction::Import { payload } => commands::scene::handle_scene_import(plane, &payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_category_set() {
        let cli = Cli::parse_from([
            "gschool",
            "categories",
            "set",
            "Games",
            "--blocked",
            "true",
            "--clear-schedule",
        ]);
        match cli.command {
            Commands::Categories {
                action:
                    CategoryAction::Set {
                        name,
                        blocked,
                        clear_schedule,
                        ..
                    },
            } => {
                assert_eq!(name, "Games");
                assert_eq!(blocked, Some(true));
                assert!(clear_schedule);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_global_data_dir() {
        let cli = Cli::parse_from(["gschool", "scene", "clear", "--data-dir", "/tmp/gs"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/gs")));
        assert!(matches!(
            cli.command,
            Commands::Scene {
                action: SceneAction::Clear
            }
        ));
    }

    #[test]
    fn test_parse_poll_create_and_respond() {
        let cli = Cli::parse_from(["gschool", "poll", "create", "Best planet?", "Mars", "Venus"]);
        match cli.command {
            Commands::Poll {
                action: PollAction::Create { question, options },
            } => {
                assert_eq!(question, "Best planet?");
                assert_eq!(options, vec!["Mars".to_string(), "Venus".to_string()]);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::parse_from(["gschool", "poll", "respond", "poll_1", "0", "-s", "alice"]);
        assert!(matches!(
            cli.command,
            Commands::Poll {
                action: PollAction::Respond { ref student, .. }
            } if student == "alice"
        ));
        assert!(Cli::try_parse_from(["gschool", "poll", "create", "No options"]).is_err());
    }

    #[test]
    fn test_parse_classroom_clears_default_to_everyone() {
        let cli = Cli::parse_from(["gschool", "hand", "clear"]);
        assert!(matches!(
            cli.command,
            Commands::Hand {
                action: HandAction::Clear { student: None }
            }
        ));
        let cli = Cli::parse_from(["gschool", "violations", "clear", "bob"]);
        assert!(matches!(
            cli.command,
            Commands::Violations {
                action: ViolationAction::Clear { student: Some(ref s) }
            } if s == "bob"
        ));
    }

    #[test]
    fn test_parse_alert_and_engagement() {
        let cli = Cli::parse_from([
            "gschool", "alerts", "raise", "alice", "--kind", "idle", "--score", "0.7",
        ]);
        match cli.command {
            Commands::Alerts {
                action:
                    AlertAction::Raise {
                        student,
                        kind,
                        score,
                        ..
                    },
            } => {
                assert_eq!(student, "alice");
                assert_eq!(kind.as_deref(), Some("idle"));
                assert!(score.is_some_and(|s| (s - 0.7).abs() < 1e-9));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::parse_from(["gschool", "engagement", "--window", "600"]);
        assert!(matches!(
            cli.command,
            Commands::Engagement {
                window: Some(600),
                json: false
            }
        ));
    }
}
