use anyhow::Result;
use rusqlite::{params, Connection};

use crate::models::CATEGORY_NAMES;

/// Initialize database schema
///
/// # Errors
///
/// Returns an error if table creation fails
pub fn init_schema(conn: &Connection) -> Result<()> {
    // Key/value settings. Values are JSON text where possible.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            k TEXT PRIMARY KEY,
            v TEXT
        )",
        [],
    )?;

    // Block configuration per category
    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            name TEXT PRIMARY KEY,
            blocked INTEGER DEFAULT 0,
            block_url TEXT
        )",
        [],
    )?;

    // Raw schedule JSON, kept exactly as submitted
    conn.execute(
        "CREATE TABLE IF NOT EXISTS category_schedules (
            name TEXT PRIMARY KEY,
            schedule_json TEXT
        )",
        [],
    )?;

    // Add columns that older databases may lack
    let columns_to_add = vec![("block_url", "TEXT")];
    for (column_name, column_type) in columns_to_add {
        let column_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('categories') WHERE name = ?1",
            params![column_name],
            |row| row.get(0),
        )?;
        if column_count == 0 {
            conn.execute(
                &format!("ALTER TABLE categories ADD COLUMN {column_name} {column_type}"),
                [],
            )?;
            log::info!("Added column {column_name} to categories table");
        }
    }

    Ok(())
}

/// Seed every known category as unblocked. Existing rows are left alone.
///
/// # Errors
///
/// Returns an error if an insert fails
pub fn insert_default_categories(conn: &Connection) -> Result<()> {
    for name in CATEGORY_NAMES {
        conn.execute(
            "INSERT OR IGNORE INTO categories (name, blocked, block_url) VALUES (?1, 0, NULL)",
            params![name],
        )?;
    }
    Ok(())
}
