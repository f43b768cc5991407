//! APM Daemon - Main Entry Point
//!
//! Per-host buffering daemon sitting between in-process agents and the
//! central ingestion server (§4.4).

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

mod actor;
mod config;
mod forwarder;
mod health;
mod lifecycle;
mod queue;
mod receiver;
mod spill;

use actor::{Actor, Command};
use config::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        dotenvy::from_path(path).ok();
    } else {
        dotenvy::dotenv().ok();
    }

    let default_filter = cli
        .log_level
        .clone()
        .unwrap_or_else(|| "apm_daemon=debug".into());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .json()
        .init();

    let mut config = config::Config::from_env()?;
    config.apply_cli(&cli);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting APM daemon"
    );

    let mut actor = Actor::new(config.clone());
    actor.replay_spills();

    let (commands_tx, commands_rx) = mpsc::channel(1024);

    let actor_task = tokio::spawn(actor.run(commands_rx));

    let receiver_task = {
        let commands = commands_tx.clone();
        let socket_path = config.listener_socket_path.clone();
        tokio::spawn(async move {
            receiver::run_stream_receiver(&socket_path, commands).await;
        })
    };

    let datagram_task = config.listener_datagram_path.clone().map(|path| {
        let commands = commands_tx.clone();
        tokio::spawn(async move {
            receiver::run_datagram_receiver(&path, commands).await;
        })
    });

    let forwarder_task = {
        let commands = commands_tx.clone();
        let config = config.clone();
        tokio::spawn(forwarder::run(config, commands))
    };

    let health_task = {
        let commands = commands_tx.clone();
        let port = config.health_port;
        tokio::spawn(health::serve(port, commands))
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining queue to disk");

    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    if commands_tx.send(Command::Shutdown(reply_tx)).await.is_ok() {
        let _ = reply_rx.await;
    }

    receiver_task.abort();
    if let Some(task) = datagram_task {
        task.abort();
    }
    forwarder_task.abort();
    health_task.abort();
    let _ = actor_task.await;

    info!("APM daemon shut down cleanly");
    Ok(())
}
