/// Teacher/admin broadcast, settings and rule handlers
use anyhow::Result;
use gschool_core::{ControlPlane, ExamAction, SettingsUpdate, TabAction, YoutubeRules};
use gschool_storage::GlobalOverrides;

use super::helpers::{format_ts, parse_json_arg, print_json, yes_no};

pub fn handle_command_push(plane: &ControlPlane, target: Option<&str>, command: &str) -> Result<()> {
    let value = parse_json_arg(command)?;
    let queued = plane.admin().push_command(target, value)?;
    println!("Queued '{}' for {}", queued.kind, target.unwrap_or("everyone"));
    Ok(())
}

pub fn handle_tabs_open(plane: &ControlPlane, student: Option<&str>, urls: Vec<String>) -> Result<()> {
    let count = urls.len();
    plane.admin().open_tabs(student, urls)?;
    println!(
        "Opening {count} tab(s) for {}",
        student.unwrap_or("everyone")
    );
    Ok(())
}

pub fn handle_tabs_action(plane: &ControlPlane, student: &str, action: &str) -> Result<()> {
    let action: TabAction = action.parse()?;
    plane.admin().tabs_action(student, action)?;
    println!("Queued {} for {student}", action.as_str());
    Ok(())
}

pub fn handle_announce(plane: &ControlPlane, text: &str) -> Result<()> {
    plane.admin().announce(text)?;
    if text.trim().is_empty() {
        println!("Announcement cleared");
    } else {
        println!("Announcement posted");
    }
    Ok(())
}

pub fn handle_notify(plane: &ControlPlane, title: Option<&str>, message: &str) -> Result<()> {
    let command = plane.admin().notify(title, message)?;
    println!(
        "Notification sent: {}",
        command
            .payload
            .get("title")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
    );
    Ok(())
}

pub fn handle_exam(plane: &ControlPlane, action: &str, url: Option<&str>) -> Result<()> {
    let action = ExamAction::parse(action, url)?;
    let started = matches!(action, ExamAction::Start { .. });
    plane.admin().exam(action)?;
    println!("Exam mode {}", if started { "started" } else { "ended" });
    Ok(())
}

pub fn handle_settings_get(plane: &ControlPlane) -> Result<()> {
    let settings = plane.admin().settings();
    println!(
        "blocked_redirect = {}",
        settings
            .blocked_redirect
            .as_deref()
            .unwrap_or(plane.config().default_block_url.as_str())
    );
    println!("chat_enabled = {}", settings.chat_enabled);
    println!(
        "passcode = {}",
        if settings.passcode.is_some() { "***" } else { "(unset)" }
    );
    println!("extension_enabled = {}", plane.admin().extension_enabled());
    Ok(())
}

pub fn handle_settings_set(plane: &ControlPlane, update: SettingsUpdate) -> Result<()> {
    let settings = plane.admin().update_settings(update)?;
    println!(
        "Settings saved (chat: {})",
        yes_no(settings.chat_enabled)
    );
    Ok(())
}

pub fn handle_overrides_show(plane: &ControlPlane) -> Result<()> {
    print_json(&plane.admin().overrides())
}

pub fn handle_overrides_set(plane: &ControlPlane, overrides: GlobalOverrides) -> Result<()> {
    plane.admin().set_overrides(overrides)?;
    let saved = plane.admin().overrides();
    println!(
        "Overrides saved ({} allowed, {} blocked)",
        saved.allowlist.len(),
        saved.teacher_blocks.len()
    );
    Ok(())
}

pub fn handle_youtube_show(plane: &ControlPlane) -> Result<()> {
    print_json(&plane.admin().youtube_rules()?)
}

pub fn handle_youtube_set(plane: &ControlPlane, rules: YoutubeRules) -> Result<()> {
    plane.admin().set_youtube_rules(rules)?;
    println!("YouTube rules updated");
    Ok(())
}

pub fn handle_doodles(plane: &ControlPlane, enabled: Option<bool>) -> Result<()> {
    let blocked = match enabled {
        Some(flag) => plane.admin().set_doodle_block(flag)?,
        None => plane.admin().doodle_block()?,
    };
    println!("Block Google doodles: {}", yes_no(blocked));
    Ok(())
}

pub fn handle_extension(plane: &ControlPlane, enabled: bool) -> Result<()> {
    plane.admin().set_extension_enabled(enabled)?;
    println!(
        "Student extensions {}",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

pub fn handle_audit(plane: &ControlPlane, limit: usize) -> Result<()> {
    for entry in plane.admin().audit_log(limit) {
        let detail = serde_json::Value::Object(entry.detail);
        println!("{}  {:<22} {detail}", format_ts(entry.ts), entry.event);
    }
    Ok(())
}
