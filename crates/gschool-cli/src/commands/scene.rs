/// Scene preset command handlers
use anyhow::Result;
use gschool_core::{ControlPlane, NewScene, SceneUpdate};
use std::path::Path;
use tabled::{Table, Tabled};

use super::helpers::{parse_json_arg, print_json, truncate_str};

#[derive(Tabled)]
struct SceneRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Patterns")]
    patterns: String,
    #[tabled(rename = "Current")]
    current: &'static str,
}

pub fn handle_scene_list(plane: &ControlPlane, json: bool) -> Result<()> {
    let file = plane.scenes().list();
    if json {
        return print_json(&file);
    }
    if file.scenes.is_empty() {
        println!("No scenes defined");
        return Ok(());
    }

    let current_id = file.current_scene().map(|s| s.id.clone());
    let rows: Vec<SceneRow> = file
        .scenes
        .iter()
        .map(|scene| {
            let patterns = match scene.kind {
                gschool_storage::SceneKind::Allowed => &scene.allow,
                gschool_storage::SceneKind::Blocked => &scene.block,
            };
            SceneRow {
                id: scene.id.clone(),
                name: scene.name.clone(),
                kind: scene.kind.to_string(),
                patterns: truncate_str(&patterns.join(", "), 60),
                current: if current_id.as_deref() == Some(scene.id.as_str()) {
                    "*"
                } else {
                    ""
                },
            }
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

pub fn handle_scene_create(plane: &ControlPlane, new: NewScene) -> Result<()> {
    let scene = plane.scenes().create(new)?;
    println!("Created scene '{}' ({}) id={}", scene.name, scene.kind, scene.id);
    Ok(())
}

pub fn handle_scene_update(plane: &ControlPlane, id: &str, update: SceneUpdate) -> Result<()> {
    let scene = plane.scenes().update(id, update)?;
    println!("Updated scene '{}' ({})", scene.name, scene.kind);
    Ok(())
}

pub fn handle_scene_delete(plane: &ControlPlane, id: &str) -> Result<()> {
    plane.scenes().delete(id)?;
    println!("Deleted scene {id}");
    Ok(())
}

pub fn handle_scene_apply(plane: &ControlPlane, id: &str) -> Result<()> {
    let current = plane.scenes().apply(id)?;
    println!("Applied scene '{}' ({})", current.name, current.kind);
    Ok(())
}

pub fn handle_scene_clear(plane: &ControlPlane) -> Result<()> {
    plane.scenes().clear()?;
    println!("Scene cleared");
    Ok(())
}

pub fn handle_scene_export(
    plane: &ControlPlane,
    id: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let export = plane.scenes().export(id)?;
    let json = serde_json::to_string_pretty(&export)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            println!("Exported to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// `payload` is inline JSON or `@file`
pub fn handle_scene_import(plane: &ControlPlane, payload: &str) -> Result<()> {
    let value = parse_json_arg(payload)?;
    match plane.scenes().import(&value)? {
        gschool_core::SceneImport::Scene(id) => println!("Imported scene {id}"),
        gschool_core::SceneImport::Scenes(count) => println!("Replaced scene store ({count} scenes)"),
    }
    Ok(())
}
