// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

mod api;
mod backend;
mod config;
mod driver_registrations;

use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use infra::infra::setup_infra_endpoints;
use infra::logging::setup_logging;
use infra::sentry::setup_sentry;
use scheduler::handler::HandlerRegistry;
use scheduler::handlers::copy::CopyHandler;
use scheduler::handlers::{FsIndexApplyDirtyHandler, FsIndexRebuildHandler, StorageUsageRefreshHandler};
use scheduler::runner::{Scheduler, SchedulerConfig};
use tokio::io::AsyncReadExt;

use crate::api::routes::AppState;
use crate::backend::Backend;
use crate::config::Config;

const SERVICE_NAME: &str = "storagehub";

fn load_secret_box(config: &Config) -> Result<Option<infra::crypto::SecretBox>, String> {
    let Some(encoded) = &config.secret_key_base64 else {
        return Ok(None);
    };
    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|err| format!("secret_key_base64 is not valid base64: {err}"))?;
    infra::crypto::SecretBox::new(&key_bytes).map(Some)
}

/// Seeds the one scheduled job this workspace always runs (§4.4: the scheduler starts with at
/// least one handler scheduled) -- per-mount fs-index jobs are created on demand by the admin
/// rebuild endpoint instead, since they don't exist until a mount does.
async fn seed_default_schedule(db: &db::Db) -> Result<(), db::DbError> {
    let conn = db.lock().await;
    if db::repo::scheduled_jobs::get(&conn, "storage_usage_refresh").is_ok() {
        return Ok(());
    }
    db::repo::scheduled_jobs::upsert(
        &conn,
        &db::models::ScheduledJob {
            task_id: "storage_usage_refresh".to_owned(),
            handler_name: "storage_usage_refresh".to_owned(),
            cron_expr: None,
            interval_seconds: Some(300),
            enabled: true,
            last_run_started_at: None,
            last_run_finished_at: None,
            next_run_after: db::now_ms(),
            lock_until: None,
            run_count: 0,
            payload_json: serde_json::json!({}),
            meta_json: serde_json::json!({}),
        },
    )?;
    log::info!("seeded storage_usage_refresh schedule at 300s interval");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = clap::Command::new("storagehub")
        .arg(clap::Arg::new("config").short('c').long("config").required(true).value_name("FILE"))
        .get_matches();

    let config_filename = matches.get_one::<String>("config").unwrap();
    let mut file = tokio::fs::File::open(config_filename).await?;
    let mut config_str = String::new();
    file.read_to_string(&mut config_str).await?;
    let config = Config::from_str(&config_str)?;

    setup_logging(config.infra.as_ref(), SERVICE_NAME);
    log::info!("storagehub config: {config:?}");
    let _sentry_guard = setup_sentry(config.infra.as_ref(), SERVICE_NAME);

    let secret_box = load_secret_box(&config)?.map(Arc::new);
    if secret_box.is_none() {
        log::warn!("no secret_key_base64 configured; storage types with secret fields cannot be created");
    }

    let db = Arc::new(db::Db::open(Path::new(&config.database_url))?);
    db.migrate().await?;
    seed_default_schedule(&db).await?;

    let registry = Arc::new(driver_registrations::build_registry());
    let backend = Arc::new(Backend::build(db.clone(), registry, secret_box.clone()).await?);

    let copy_handler = Arc::new(CopyHandler::new(backend.clone(), config.scheduler.max_concurrent_copy_items));

    let mut handlers = HandlerRegistry::new();
    handlers.register(Arc::new(StorageUsageRefreshHandler::new(db.clone(), backend.clone())));
    handlers.register(Arc::new(FsIndexRebuildHandler::new(db.clone(), backend.clone())));
    handlers.register(Arc::new(FsIndexApplyDirtyHandler::new(db.clone())));
    handlers.register(copy_handler.clone());

    let scheduler = Arc::new(Scheduler::new(
        db.clone(),
        handlers,
        SchedulerConfig {
            tick_interval: std::time::Duration::from_secs(config.scheduler.tick_interval_seconds),
            lease_seconds: config.scheduler.lease_seconds,
        },
    ));
    tokio::spawn(scheduler.clone().run_forever());

    let app_state = AppState {
        backend: backend.clone(),
        db: db.clone(),
        scheduler: scheduler.clone(),
        copy_handler,
        secret_box,
        is_posix_host: cfg!(unix),
    };
    let router = api::build_router(app_state);

    let address: SocketAddr = config.listen_address.parse()?;
    log::info!("serving storagehub on {address}");

    let mut shutdown_receiver = setup_infra_endpoints(config.infra.clone().unwrap_or_default(), move || {
        metrics::gauge!("storagehub_scheduled_jobs_registered", 1.0);
    })
    .map_err(|err| format!("setup infra endpoints: {err}"))?;

    axum::Server::bind(&address)
        .serve(router.into_make_service())
        .with_graceful_shutdown(async move { while shutdown_receiver.changed().await.is_ok() {} })
        .await?;

    Ok(())
}
