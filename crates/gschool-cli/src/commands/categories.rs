/// Category flag and schedule management
use anyhow::Result;
use gschool_core::{schedule, CategoryUpdateRequest, ControlPlane};
use gschool_storage::Category;
use tabled::{Table, Tabled};

use super::helpers::{parse_json_arg, yes_no};

#[derive(Tabled)]
struct CategoryRow {
    #[tabled(rename = "Category")]
    name: String,
    #[tabled(rename = "Blocked")]
    blocked: &'static str,
    #[tabled(rename = "Active now")]
    active: &'static str,
    #[tabled(rename = "Schedule")]
    schedule: String,
    #[tabled(rename = "Block URL")]
    block_url: String,
}

fn describe_schedule(category: &Category) -> String {
    match &category.schedule {
        Some(s) if s.enabled => {
            let window = format!(
                "{}-{}",
                s.start.as_deref().unwrap_or("00:00"),
                s.end.as_deref().unwrap_or("23:59")
            );
            if s.weekdays_only {
                format!("{window} (weekdays)")
            } else {
                window
            }
        }
        Some(_) => "disabled".to_string(),
        None => "-".to_string(),
    }
}

pub fn handle_categories_list(plane: &ControlPlane) -> Result<()> {
    let categories = plane.admin().categories()?;
    let now = chrono::Local::now().naive_local();

    let rows: Vec<CategoryRow> = categories
        .iter()
        .map(|c| CategoryRow {
            name: c.name.clone(),
            blocked: yes_no(c.blocked),
            active: yes_no(schedule::effective_block(c.blocked, c.schedule.as_ref(), now)),
            schedule: describe_schedule(c),
            block_url: c.block_url.clone().unwrap_or_default(),
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}

/// Options for `categories set`; only given fields change
pub struct CategorySetArgs {
    pub name: String,
    pub blocked: Option<bool>,
    pub block_url: Option<String>,
    pub clear_block_url: bool,
    pub schedule: Option<String>,
    pub clear_schedule: bool,
}

pub fn handle_categories_set(plane: &ControlPlane, args: CategorySetArgs) -> Result<()> {
    let block_url = if args.clear_block_url {
        Some(None)
    } else {
        args.block_url.map(Some)
    };
    let schedule = if args.clear_schedule {
        Some(serde_json::Value::Null)
    } else {
        args.schedule.as_deref().map(parse_json_arg).transpose()?
    };

    let category = plane.update_category(CategoryUpdateRequest {
        name: args.name,
        blocked: args.blocked,
        block_url,
        schedule,
    })?;
    println!(
        "{}: blocked={} schedule={}",
        category.name,
        yes_no(category.blocked),
        describe_schedule(&category)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gschool_storage::Schedule;

    #[test]
    fn test_describe_schedule() {
        let mut category = Category::new("Games");
        assert_eq!(describe_schedule(&category), "-");

        category.schedule = Some(Schedule::window("08:00", "15:00"));
        assert_eq!(describe_schedule(&category), "08:00-15:00");

        if let Some(s) = category.schedule.as_mut() {
            s.weekdays_only = true;
        }
        assert_eq!(describe_schedule(&category), "08:00-15:00 (weekdays)");
    }
}
