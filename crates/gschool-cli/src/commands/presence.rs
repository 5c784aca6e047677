/// Heartbeat, timeline and presentation handlers
use anyhow::{Context, Result};
use gschool_core::{ControlPlane, Heartbeat};
use tabled::{Table, Tabled};

use super::helpers::{format_ts, parse_json_arg, print_json, truncate_str};

/// `body` is the heartbeat JSON inline or `@file`
pub fn handle_heartbeat(plane: &ControlPlane, body: &str) -> Result<()> {
    let beat: Heartbeat =
        serde_json::from_value(parse_json_arg(body)?).context("Invalid heartbeat body")?;
    let response = plane.presence().heartbeat(beat)?;
    print_json(&response)
}

#[derive(Tabled)]
struct TimelineRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Student")]
    student: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "URL")]
    url: String,
}

pub fn handle_timeline(
    plane: &ControlPlane,
    student: Option<&str>,
    since: i64,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let items = plane.presence().timeline(student, since, limit);
    if json {
        return print_json(&items);
    }
    if items.is_empty() {
        println!("No browsing history recorded");
        return Ok(());
    }
    let rows: Vec<TimelineRow> = items
        .into_iter()
        .map(|item| TimelineRow {
            time: format_ts(item.entry.ts),
            student: item.student,
            title: truncate_str(&item.entry.title, 40),
            url: truncate_str(&item.entry.url, 60),
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

pub fn handle_presence(plane: &ControlPlane) -> Result<()> {
    let presence = plane.presence().presence();
    if presence.is_empty() {
        println!("No students seen yet");
        return Ok(());
    }
    for (student, record) in presence {
        let url = record
            .tab
            .get("url")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        println!(
            "{student:<30} {}  {} tab(s)  {}",
            format_ts(record.last_seen),
            record.tabs.len(),
            truncate_str(url, 60)
        );
    }
    Ok(())
}

pub fn handle_ice_servers(plane: &ControlPlane) -> Result<()> {
    print_json(&plane.presentation().ice_servers())
}
