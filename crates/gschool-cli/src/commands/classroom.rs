/// Exam violations, attention checks, polls, raised hands and off-task alerts
use anyhow::Result;
use gschool_core::{AlertReport, ControlPlane};
use serde_json::Value;
use tabled::{Table, Tabled};

use super::helpers::{format_ts, print_json, truncate_str};

#[derive(Tabled)]
struct StudentRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Student")]
    student: String,
    #[tabled(rename = "Detail")]
    detail: String,
    #[tabled(rename = "URL")]
    url: String,
}

fn print_rows(rows: Vec<StudentRow>, empty: &str) {
    if rows.is_empty() {
        println!("{empty}");
    } else {
        println!("{}", Table::new(rows));
    }
}

pub fn handle_violations_list(plane: &ControlPlane, json: bool) -> Result<()> {
    let violations = plane.admin().exam_violations();
    if json {
        return print_json(&violations);
    }
    let rows = violations
        .into_iter()
        .map(|v| StudentRow {
            time: format_ts(v.ts),
            student: v.student,
            detail: v.reason,
            url: truncate_str(&v.url, 60),
        })
        .collect();
    print_rows(rows, "No exam violations recorded");
    Ok(())
}

pub fn handle_violation_record(
    plane: &ControlPlane,
    student: &str,
    url: &str,
    reason: Option<&str>,
) -> Result<()> {
    let violation = plane.admin().record_exam_violation(student, url, reason)?;
    println!("Recorded {} for {}", violation.reason, violation.student);
    Ok(())
}

pub fn handle_violations_clear(plane: &ControlPlane, student: Option<&str>) -> Result<()> {
    plane.admin().clear_exam_violations(student)?;
    match student {
        Some(student) => println!("Cleared exam violations for {student}"),
        None => println!("Cleared all exam violations"),
    }
    Ok(())
}

pub fn handle_attention_start(
    plane: &ControlPlane,
    title: Option<&str>,
    timeout: Option<u32>,
) -> Result<()> {
    let check = plane.admin().start_attention_check(title, timeout)?;
    println!("Attention check sent: \"{}\" ({}s)", check.title, check.timeout);
    Ok(())
}

pub fn handle_attention_respond(
    plane: &ControlPlane,
    student: &str,
    response: &str,
) -> Result<()> {
    plane.admin().attention_response(student, response)?;
    println!("Response recorded");
    Ok(())
}

pub fn handle_attention_results(plane: &ControlPlane, json: bool) -> Result<()> {
    let Some(check) = plane.admin().attention_results() else {
        println!("No attention check has been started");
        return Ok(());
    };
    if json {
        return print_json(&check);
    }
    println!("{} (started {}, {}s)", check.title, format_ts(check.ts), check.timeout);
    if check.responses.is_empty() {
        println!("  No responses yet");
    }
    for (student, answer) in &check.responses {
        println!("  {student:<30} {}  {}", format_ts(answer.ts), answer.response);
    }
    Ok(())
}

pub fn handle_poll_create(
    plane: &ControlPlane,
    question: &str,
    options: Vec<String>,
) -> Result<()> {
    let id = plane.admin().create_poll(question, options)?;
    println!("Poll created: {id}");
    Ok(())
}

/// `answer` is stored as JSON when it parses, otherwise as a plain string
pub fn handle_poll_respond(
    plane: &ControlPlane,
    poll_id: &str,
    student: &str,
    answer: &str,
) -> Result<()> {
    let answer =
        serde_json::from_str(answer).unwrap_or_else(|_| Value::String(answer.to_string()));
    plane.admin().poll_response(poll_id, student, answer)?;
    println!("Answer recorded");
    Ok(())
}

pub fn handle_poll_list(plane: &ControlPlane, json: bool) -> Result<()> {
    let polls = plane.admin().polls();
    if json {
        return print_json(&polls);
    }
    if polls.is_empty() {
        println!("No polls yet");
        return Ok(());
    }
    for (id, poll) in &polls {
        println!("{id}  {}  [{}]", poll.question, poll.options.join(" / "));
        for response in &poll.responses {
            let who = if response.student.is_empty() {
                "(anonymous)"
            } else {
                response.student.as_str()
            };
            println!("  {who:<30} {}", response.answer);
        }
    }
    Ok(())
}

pub fn handle_hand_raise(plane: &ControlPlane, student: &str, note: &str) -> Result<()> {
    let hand = plane.admin().raise_hand(student, note)?;
    println!("{} raised a hand", hand.student);
    Ok(())
}

pub fn handle_hands_list(plane: &ControlPlane) -> Result<()> {
    let rows = plane
        .admin()
        .hands()
        .into_iter()
        .map(|hand| StudentRow {
            time: format_ts(hand.ts),
            student: hand.student,
            detail: truncate_str(&hand.note, 40),
            url: String::new(),
        })
        .collect();
    print_rows(rows, "No hands raised");
    Ok(())
}

pub fn handle_hands_clear(plane: &ControlPlane, student: Option<&str>) -> Result<()> {
    let remaining = plane.admin().clear_hands(student)?;
    println!("{remaining} hand(s) still raised");
    Ok(())
}

pub fn handle_offtask_check(plane: &ControlPlane, student: &str, url: &str) -> Result<()> {
    let on_task = plane.presence().check_off_task(student, url)?;
    println!("{}", if on_task { "on task" } else { "off task" });
    Ok(())
}

pub fn handle_alerts_list(plane: &ControlPlane, json: bool) -> Result<()> {
    let alerts = plane.presence().alerts();
    if json {
        return print_json(&alerts);
    }
    let rows = alerts
        .into_iter()
        .map(|alert| StudentRow {
            time: format_ts(alert.ts),
            student: alert.student,
            detail: format!("{} ({:.2})", alert.kind, alert.score),
            url: truncate_str(&alert.url, 60),
        })
        .collect();
    print_rows(rows, "No alerts");
    Ok(())
}

pub fn handle_alert_raise(plane: &ControlPlane, report: AlertReport) -> Result<()> {
    let alert = plane.presence().raise_alert(report)?;
    println!("Alert raised: {} for {}", alert.kind, alert.student);
    Ok(())
}

pub fn handle_alerts_clear(plane: &ControlPlane, student: Option<&str>) -> Result<()> {
    plane.presence().clear_alerts(student)?;
    match student {
        Some(student) => println!("Cleared alerts for {student}"),
        None => println!("Cleared all alerts"),
    }
    Ok(())
}

#[derive(Tabled)]
struct EngagementRow {
    #[tabled(rename = "Student")]
    student: String,
    #[tabled(rename = "Engagement")]
    engagement: String,
    #[tabled(rename = "Off task")]
    offtask: usize,
    #[tabled(rename = "Alerts")]
    alerts: usize,
    #[tabled(rename = "Tabs")]
    tabs: usize,
    #[tabled(rename = "Risk")]
    risk: String,
}

pub fn handle_engagement(plane: &ControlPlane, window: Option<i64>, json: bool) -> Result<()> {
    let report = plane.presence().engagement(window);
    if json {
        return print_json(&report);
    }
    if report.students.is_empty() {
        println!("No students seen in the last {}s", report.window);
        return Ok(());
    }
    let rows: Vec<EngagementRow> = report
        .students
        .into_iter()
        .map(|s| EngagementRow {
            engagement: format!("{:.0}%", s.engagement * 100.0),
            risk: format!("{:?}", s.risk).to_lowercase(),
            student: s.student,
            offtask: s.offtask_events,
            alerts: s.alerts,
            tabs: s.tabs_open,
        })
        .collect();
    println!("Window: {}s since {}", report.window, format_ts(report.since));
    println!("{}", Table::new(rows));
    Ok(())
}
