//! pgnstudyrelay: relay a live PGN feed into a remote study's move tree.
//!
//! # Usage
//!
//! ```bash
//! pgnstudyrelay <username> <password> <study_url> <source> \
//!     [--poll_delay 1.0] [--log_ws]
//! ```
//!
//! `username`/`password` fall back to `LICHESS_USERNAME`/`LICHESS_PASSWORD`
//! if omitted, matching the teacher's env-first convenience for local runs.

use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;

use pgnstudyrelay::config::Config;
use pgnstudyrelay::error::RelayError;
use pgnstudyrelay::poll::{PollDriver, PollSource};
use pgnstudyrelay::study::client::{parse_inbound, InboundEvent, StudyClient};
use pgnstudyrelay::study::Study;
use pgnstudyrelay::sync::SyncEngine;

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    if let Err(e) = run().await {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), RelayError> {
    let config = Config::from_args()?;

    info!("logging in as {}", config.username);
    let mut client = StudyClient::new(config.host, config.study_id.clone(), config.log_ws)?;
    client.login(&config.username, &config.password).await?;

    let study = Study::new(config.study_id.clone());
    {
        let mut cache = study.cache.lock().await;
        cache.sync_full(&client).await?;
    }
    study.ensure_contributor(&config.username).await?;

    info!("connecting to study socket");
    let mut read = client.connect_ws().await?;
    let client = Arc::new(client);

    let reader_cache = study.cache.clone();
    let reader_client = client.clone();
    let log_ws = config.log_ws;
    tokio::spawn(async move {
        use futures_util::StreamExt;
        loop {
            let msg = match read.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(_)) | None => {
                    reader_client.latch_stop();
                    break;
                }
            };
            let text = match msg.to_text() {
                Ok(t) => t.to_string(),
                Err(_) => continue,
            };
            if log_ws {
                log::debug!("<- [RECEIVE]: {}", text);
            }
            let event = match parse_inbound(&text) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("could not decode inbound frame: {}", e);
                    continue;
                }
            };
            match event {
                InboundEvent::AddChapter { chapter_id } => {
                    let mut cache = reader_cache.lock().await;
                    if let Err(e) = cache.sync_chapter(&reader_client, &chapter_id).await {
                        log::warn!("failed to sync pushed chapter {}: {}", chapter_id, e);
                    }
                }
                InboundEvent::Reload { chapter_id: Some(chapter_id) } => {
                    let mut cache = reader_cache.lock().await;
                    if let Err(e) = cache.sync_chapter(&reader_client, &chapter_id).await {
                        log::warn!("failed to sync reloaded chapter {}: {}", chapter_id, e);
                    }
                }
                InboundEvent::Reload { chapter_id: None } => {
                    let mut cache = reader_cache.lock().await;
                    if let Err(e) = cache.sync_full(&reader_client).await {
                        log::warn!("full resync failed: {}", e);
                    }
                }
                InboundEvent::ChatMessage { author, force_sync } => {
                    if force_sync {
                        let mut cache = reader_cache.lock().await;
                        if cache.is_contributor(&author) {
                            info!("{} requested a sync", author);
                            if let Err(e) = cache.sync_full(&reader_client).await {
                                log::warn!("chat-triggered resync failed: {}", e);
                            }
                        }
                    }
                }
                InboundEvent::Unhandled => {}
            }
        }
    });

    let mut engine = SyncEngine::new(client.clone(), study.cache.clone());
    let source = PollSource::classify(&config.source);
    let mut driver = PollDriver::new(source, config.poll_delay);
    let stop_watcher = client.clone();

    driver
        .run(|games| {
            let engine = &mut engine;
            let stop_watcher = &stop_watcher;
            async move {
                if stop_watcher.should_stop() {
                    error!("lost connection to the study socket, exiting");
                    std::process::exit(1);
                }
                for game in games {
                    if let Err(e) = engine.run_cycle(game).await {
                        log::warn!("sync cycle failed: {}", e);
                    }
                }
            }
        })
        .await
}
