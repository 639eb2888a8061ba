use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod client;
mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use client::{
    driver::{LocalFile, UploadDriver, UploadState},
    http::HttpUploadApi,
    human_size,
};
use config::{AppConfig, ClientArgs, Cli, Command, ServerArgs};
use models::{credential::UploadSession, user::UserId};
use services::{identity::SqliteIdentity, sweeper::spawn_sweeper};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve(ServerArgs::default())) {
        Command::Serve(args) => serve(&args).await,
        Command::Migrate(args) => migrate(&args).await,
        Command::IssueToken { user_id, server } => issue_token(user_id, &server).await,
        Command::Upload { files, client } => upload(&files, &client).await,
        Command::List { client } => list(&client).await,
    }
}

async fn serve(args: &ServerArgs) -> Result<()> {
    let cfg = AppConfig::from_env_and_args(args)?;
    tracing::info!("Starting upload-broker with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let db = db::connect(&cfg.database_url).await?;
    db::run_migrations(&db).await?;

    let state = AppState::from_config(&cfg, db)?;

    if let Some(secs) = cfg.orphan_sweep_secs {
        tracing::info!("Orphan sweep enabled every {}s", secs);
        spawn_sweeper(
            state.metadata.clone(),
            Arc::new(state.objects.clone()),
            Duration::from_secs(secs),
            Duration::from_secs(cfg.upload_ttl_secs),
        );
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn migrate(args: &ServerArgs) -> Result<()> {
    let cfg = AppConfig::from_env_and_args(args)?;
    let db = db::connect(&cfg.database_url).await?;
    db::run_migrations(&db).await?;
    tracing::info!("Database migration complete.");
    Ok(())
}

async fn issue_token(user_id: Uuid, args: &ServerArgs) -> Result<()> {
    let cfg = AppConfig::from_env_and_args(args)?;
    let db = db::connect(&cfg.database_url).await?;
    db::run_migrations(&db).await?;

    let token = SqliteIdentity::new(db)
        .issue_token(UserId(user_id))
        .await
        .context("storing API token")?;
    tracing::info!(user = %user_id, "Issued API token");
    println!("{token}");
    Ok(())
}

async fn upload(paths: &[PathBuf], args: &ClientArgs) -> Result<()> {
    let api = HttpUploadApi::new(&args.server, &args.token)?;
    let mut driver = UploadDriver::new(api, |session: &UploadSession| {
        println!(
            "Uploaded {} ({}, {}) as {}",
            session.metadata.name,
            human_size(session.metadata.size_bytes),
            session.metadata.mime_type,
            session.metadata.id
        );
    });

    let mut failed = 0;
    for path in paths {
        let file = LocalFile::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        driver.select(Some(file));
        driver.submit().await;

        match driver.state() {
            UploadState::Succeeded(_) => {}
            UploadState::Failed(failure) => {
                let name = driver.selected().map_or("<none>", |f| f.name.as_str());
                eprintln!("Failed to upload {}: {}", name, failure.user_message());
                failed += 1;
            }
            other => anyhow::bail!("upload stopped in unexpected state {:?}", other.phase()),
        }
        // Reset the form for the next file.
        driver.cancel();
    }
    tracing::debug!(phases = ?driver.history(), "uploads finished");

    if failed > 0 {
        anyhow::bail!("{} of {} uploads failed", failed, paths.len());
    }
    Ok(())
}

async fn list(args: &ClientArgs) -> Result<()> {
    let api = HttpUploadApi::new(&args.server, &args.token)?;
    let objects = api.list_objects().await?;
    if objects.is_empty() {
        println!("No objects uploaded yet.");
        return Ok(());
    }

    for listing in objects {
        let meta = &listing.metadata;
        println!(
            "{}  {:>10}  {:<24}  {}  {}",
            meta.created_at.format("%Y-%m-%d %H:%M:%S"),
            human_size(meta.size_bytes),
            meta.mime_type,
            meta.id,
            meta.name
        );
        if let Some(url) = listing.preview_url {
            println!("    preview: {url}");
        }
    }
    Ok(())
}
