/// Class session and per-student override handlers
use anyhow::Result;
use gschool_core::{ClassToggle, ClassUpdate, ControlPlane};

use super::helpers::yes_no;

pub fn handle_class_show(plane: &ControlPlane) -> Result<()> {
    let view = plane.admin().class();
    let class = &view.class;

    println!("Class: {}", class.name);
    println!("\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}");
    println!("Active:        {}", yes_no(class.active));
    println!("Focus mode:    {}", yes_no(class.focus_mode));
    println!("Paused:        {}", yes_no(class.paused));
    println!("Chat enabled:  {}", yes_no(view.settings.chat_enabled));
    println!("Allowlist:     {}", list_or_dash(&class.allowlist));
    println!("Teacher blocks: {}", list_or_dash(&class.teacher_blocks));
    Ok(())
}

fn list_or_dash(list: &[String]) -> String {
    if list.is_empty() {
        "-".to_string()
    } else {
        list.join(", ")
    }
}

pub fn handle_class_set(plane: &ControlPlane, update: ClassUpdate) -> Result<()> {
    let view = plane.admin().set_class(update)?;
    println!(
        "Class updated (active: {}, {} allowed, {} blocked)",
        yes_no(view.class.active),
        view.class.allowlist.len(),
        view.class.teacher_blocks.len()
    );
    Ok(())
}

pub fn handle_class_toggle(plane: &ControlPlane, key: &str, value: bool) -> Result<()> {
    let toggle: ClassToggle = key.parse()?;
    let class = plane.admin().toggle_class(toggle, value)?;
    println!(
        "Focus mode: {}, paused: {}",
        yes_no(class.focus_mode),
        yes_no(class.paused)
    );
    Ok(())
}

pub fn handle_student_set(
    plane: &ControlPlane,
    student: &str,
    focus_mode: Option<bool>,
    paused: Option<bool>,
) -> Result<()> {
    let ov = plane
        .admin()
        .set_student_override(student, focus_mode, paused)?;
    let show = |flag: Option<bool>| flag.map_or("class default", yes_no);
    println!(
        "{student}: focus mode {}, paused {}",
        show(ov.focus_mode),
        show(ov.paused)
    );
    Ok(())
}
