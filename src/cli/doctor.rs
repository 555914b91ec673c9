//! CLI `doctor` command — open the configured backend and print a status report.

use std::path::Path;

use anyhow::{Context, Result};

use memstore::config::MemoryConfig;
use memstore::db;
use memstore::store::open_store;

/// Open and initialize the configured backend, then print what was found.
pub async fn doctor(config: &MemoryConfig, config_path: &Path) -> Result<()> {
    let namespace = config.namespace();

    println!("memstore Status Report");
    println!("======================");
    println!();
    println!("Config file:       {}", config_path.display());
    println!("Backend:           {}", config.storage.backend);
    println!("Namespace:         {namespace}");
    if !namespace.is_dim_known() {
        println!("  NOTE: embedding dimension not yet discovered; it is recorded on first embed.");
    }
    println!();

    match config.storage.backend.as_str() {
        "sqlite" => {
            let db_path = config.storage.resolved_db_path();
            println!("Database:          {}", db_path.display());
            if db_path.exists() {
                let size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
                let conn = db::open_database(&db_path)
                    .context("failed to open database (may be corrupt)")?;
                let version = db::migrations::get_schema_version(&conn)
                    .context("failed to read schema version")?;
                println!("File size:         {}", format_bytes(size));
                println!("Schema version:    {version}");
            } else {
                println!("File size:         (not created yet)");
            }
        }
        "qdrant" => println!("Endpoint:          {}", config.storage.url),
        _ => {}
    }

    let store = match open_store(&config.storage).await {
        Ok(store) => store,
        Err(e) => {
            println!("Connectivity:      FAILED ({e})");
            return Ok(());
        }
    };
    match store.initialize(&namespace.to_string()).await {
        Ok(()) => println!("Connectivity:      OK"),
        Err(e) => println!("Connectivity:      FAILED ({e})"),
    }
    store.close().await.context("failed to close store")?;

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
