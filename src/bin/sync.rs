//! cadence-sync — command-line front end for the planner sync core.
//!
//! Usage: cadence-sync <status|pull|push|watch|wipe>

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use cadence::identity::derive_identity;
use cadence::{
    BinClient, Config, PlannerStore, PollOutcome, PushOutcome, SyncEvent, SyncService,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = Config::load()?;

    match args.get(1).map(String::as_str) {
        Some("status") => cmd_status(&config),
        Some("pull") => cmd_pull(&config).await,
        Some("push") => cmd_push(&config).await,
        Some("watch") => cmd_watch(&config).await,
        Some("wipe") => cmd_wipe(&config),
        _ => {
            eprintln!("Usage: cadence-sync <command>");
            eprintln!();
            eprintln!("Commands:");
            eprintln!("  status   show identity, remote pointer and local slice counts");
            eprintln!("  pull     run one poll cycle against the remote store");
            eprintln!("  push     upload the current aggregate now");
            eprintln!("  watch    poll continuously until interrupted");
            eprintln!("  wipe     clear all local slices and sync bookkeeping");
            std::process::exit(1);
        }
    }
}

fn open_store(config: &Config) -> Result<PlannerStore> {
    match config.storage.data_dir.as_deref() {
        Some(dir) if !dir.is_empty() => {
            std::fs::create_dir_all(dir)?;
            PlannerStore::open(&Path::new(dir).join("planner.redb"))
        }
        _ => PlannerStore::open_default(),
    }
}

fn build_service(
    config: &Config,
) -> Result<(Arc<SyncService>, mpsc::UnboundedReceiver<SyncEvent>)> {
    let store = Arc::new(open_store(config)?);
    let remote = Arc::new(BinClient::new(
        &config.remote.base_url,
        &config.remote.api_key,
    ));
    SyncService::new(store, remote, config)
}

fn cmd_status(config: &Config) -> Result<()> {
    let store = open_store(config)?;

    if config.remote.is_configured() {
        println!("identity:        {}", derive_identity(&config.remote.api_key));
    } else {
        println!("identity:        (sync not configured)");
    }
    println!(
        "remote document: {}",
        store.remote_document_id()?.unwrap_or_else(|| "-".into())
    );
    println!(
        "last seen:       {}",
        store
            .last_seen_updated()?
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".into())
    );
    println!("pending upload:  {}", store.pending_unverified()?);
    println!();
    println!("weeks tracked:   {}", store.weekly_important_tasks()?.len());
    println!("days with tasks: {}", store.quick_tasks()?.len());
    println!("timed tasks:     {}", store.task_time_records()?.len());
    println!("year goals:      {}", store.year_goals()?.len());
    println!("working hours:   {}", store.total_working_hours()?);
    Ok(())
}

async fn cmd_pull(config: &Config) -> Result<()> {
    let (service, _events) = build_service(config)?;
    match service.poll_once().await? {
        PollOutcome::NotConfigured => {
            println!("sync is not configured; set remote.api_key in the config file")
        }
        PollOutcome::NoRemote => println!("no remote document yet; a push will create one"),
        PollOutcome::UpToDate => println!("already up to date"),
        PollOutcome::Applied => println!("remote changes merged into local data"),
    }
    Ok(())
}

async fn cmd_push(config: &Config) -> Result<()> {
    let (service, _events) = build_service(config)?;
    match service.push_once().await? {
        PushOutcome::NotConfigured => {
            println!("sync is not configured; set remote.api_key in the config file")
        }
        PushOutcome::InFlight => println!("an upload is already in flight"),
        PushOutcome::Uploaded { document_id } => println!("uploaded to document {document_id}"),
    }
    Ok(())
}

async fn cmd_watch(config: &Config) -> Result<()> {
    let (service, mut events) = build_service(config)?;
    let handle = service.start();
    println!("watching for remote changes (ctrl-c to stop)");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SyncEvent::RemoteApplied { last_updated }) => {
                    println!("merged remote changes from {last_updated}");
                }
                Some(SyncEvent::Uploaded { document_id }) => {
                    println!("uploaded to document {document_id}");
                }
                Some(SyncEvent::SyncFailed { message }) => {
                    eprintln!("sync failed: {message}");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.stop().await;
    Ok(())
}

fn cmd_wipe(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    store.wipe()?;
    println!("local planner data and sync bookkeeping cleared");
    Ok(())
}
