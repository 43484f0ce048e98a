use std::error::Error;
use std::time::Duration;

use clap::Parser;
use tasksync::jobs::CHAINED_SYNC;
use tasksync::{NewTask, SyncConfig, TaskSyncBuilder};

/// Create a few tasks and run the startup sync against in-memory remote stores.
#[derive(Parser, Debug)]
#[command(name = "tasksync-demo", version)]
struct Args {
    /// SQLite database URL.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite::memory:")]
    database_url: String,

    /// User the tasks are created for and pulled by.
    #[arg(long, default_value = "demo-user")]
    user: String,

    /// Remote collection name.
    #[arg(long, default_value = "tasks")]
    collection: String,

    /// Delete the first task after the initial sync and sync again.
    #[arg(long)]
    delete_first: bool,

    /// Task titles to create.
    #[arg(default_values_t = ["Buy milk".to_string(), "Call grandma".to_string()])]
    titles: Vec<String>,
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = SyncConfig {
        collection: args.collection.clone(),
        backoff_base_ms: 500,
        ..SyncConfig::default()
    };
    let sync = TaskSyncBuilder::new(&args.database_url)
        .with_config(config)
        .build()
        .await?;
    sync.settings().set_current_user_id(&args.user).await?;

    let mut created = Vec::new();
    for title in &args.titles {
        match sync.repository().create(NewTask::titled(title.as_str())).await {
            Ok(task) => created.push(task),
            Err(e) => log::warn!("Skipping {title:?}: {e}"),
        }
    }
    println!("Created {} task(s) for {}", created.len(), args.user);

    let mut events = sync.job_events();
    sync.on_app_start(&args.user).await?;

    // The startup chain reports push and then pull.
    let mut chain_steps = 0;
    while chain_steps < 2 {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv()).await??;
        println!("[{}] {} {:?}: {}", event.name, event.tag, event.state, event.message);
        if event.name == CHAINED_SYNC {
            chain_steps += 1;
        }
    }

    if args.delete_first
        && let Some(first) = created.first()
    {
        sync.repository().soft_delete(&first.id).await?;
        let report = sync.reconcile().await?;
        println!("Deleted {}: {}", first.id, report.summary());
    }

    for task in sync.tasks().borrow().iter() {
        println!("{:<36}  {:<10}  {}", task.id, task.sync_status.as_str(), task.title);
    }

    sync.shutdown().await;
    Ok(())
}
