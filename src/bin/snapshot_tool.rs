use anyhow::{Context, Result};
use schooljoin::{
    cache::SnapshotFile,
    config::{CacheMode, Config},
    fetch::SheetsClient,
    service::{AdminAction, AdminOutcome, DataService},
};
use std::{env, path::PathBuf, process::exit, sync::Arc};
use tracing_subscriber::{fmt, EnvFilter};

fn usage(bin: &str) -> ! {
    eprintln!("Usage: {} <refresh|inspect> [SNAPSHOT_PATH]", bin);
    exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        usage(&args[0]);
    }
    let mut config = Config::from_env().context("reading configuration")?;
    if let Some(path) = args.get(2) {
        config.snapshot_path = PathBuf::from(path);
    }

    match args[1].as_str() {
        "refresh" => refresh(config).await,
        "inspect" => inspect(&config),
        _ => usage(&args[0]),
    }
}

/// Fetch both sheets and write the snapshot file, as `/admin/refresh` would.
async fn refresh(mut config: Config) -> Result<()> {
    config.mode = CacheMode::Snapshot;
    let source = SheetsClient::new(&config.sheets).context("building sheets client")?;
    let service = DataService::new(Arc::new(source), &config);

    let outcome = service
        .execute(AdminAction::Refresh {
            reason: "cli".into(),
        })
        .await
        .context("refreshing snapshot")?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if let AdminOutcome::Refreshed(report) = outcome {
        if !report.persisted.ok {
            anyhow::bail!(
                "snapshot not written: {}",
                report.persisted.error.unwrap_or_default()
            );
        }
    }
    Ok(())
}

/// Print what a snapshot file holds without touching upstream.
fn inspect(config: &Config) -> Result<()> {
    let file = SnapshotFile::new(config.snapshot_path.clone());
    let info = file.info();
    println!("=== Snapshot File: {} ===", info.path.display());
    let Some((snapshot, metrics)) = file
        .load()
        .with_context(|| format!("loading {}", info.path.display()))?
    else {
        println!("(absent)");
        return Ok(());
    };

    let summary = snapshot.summary();
    println!("Size:               {} bytes", info.bytes.unwrap_or(0));
    if let Some(modified) = info.modified {
        println!("Modified:           {}", modified.to_rfc3339());
    }
    println!("Populated:          {}", summary.populated);
    println!(
        "Last updated:       {}",
        summary
            .last_updated
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "<never>".into())
    );
    println!(
        "Last reason:        {}",
        summary.last_refresh_reason.as_deref().unwrap_or("<none>")
    );
    println!("Profile rows:       {}", summary.profile_rows);
    println!("Performance rows:   {}", summary.performance_rows);
    println!("Joined schools:     {}", summary.joined_count);
    if let Some(key) = &snapshot.performance_key {
        println!("Key view columns:   {}", key.headers.len());
    }
    println!();
    println!("=== Stored Counters ===");
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
