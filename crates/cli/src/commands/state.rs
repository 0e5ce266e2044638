//! State command - inspect and reset stored cursors

use anyhow::{Context, Result};
use post_relay_adapters::state::SqliteStateStore;
use post_relay_domain::StateStore;
use std::path::PathBuf;

use crate::args::{StateArgs, StateCommands};
use crate::config::AppConfig;

pub async fn execute(args: StateArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let store = SqliteStateStore::new(&config.general.state_db_path)
        .await
        .context("Failed to open SQLite state store")?;

    match args.command {
        StateCommands::Cursors { json } => list_cursors(&store, json).await,
        StateCommands::Reset { source_id } => reset_cursor(&store, &source_id).await,
    }
}

async fn list_cursors(store: &dyn StateStore, json: bool) -> Result<()> {
    let cursors = store.list_cursors().await.context("Failed to read cursors")?;
    let seen = store.seen_count().await.context("Failed to count seen posts")?;

    if json {
        let value = serde_json::json!({
            "cursors": cursors
                .iter()
                .map(|c| serde_json::json!({ "source_id": c.source_id, "cursor": c.value }))
                .collect::<Vec<_>>(),
            "seen": seen,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if cursors.is_empty() {
        println!("No cursors stored.");
    } else {
        let width = cursors.iter().map(|c| c.source_id.len()).max().unwrap_or(0);
        for cursor in &cursors {
            println!("{:<width$}  {}", cursor.source_id, cursor.value, width = width);
        }
    }
    println!();
    println!("Delivered posts: {}", seen);

    Ok(())
}

async fn reset_cursor(store: &dyn StateStore, source_id: &str) -> Result<()> {
    let removed = store
        .delete_cursor(source_id.trim())
        .await
        .context("Failed to delete cursor")?;

    if removed {
        tracing::info!(source = %source_id, "Cursor reset");
        println!("Cursor reset for {}", source_id);
    } else {
        println!("No cursor stored for {}", source_id);
    }

    Ok(())
}
