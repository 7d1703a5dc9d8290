mod command;
mod config;
mod connection;
mod dashboard;
mod fault_log;
mod logging;
mod message;
mod tui;

use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use tokio::sync::broadcast;
use tokio::task;
use tracing::{info, warn};

use crate::command::Command;
use crate::connection::{ConnectionManager, WebSocketConnector};
use crate::dashboard::DashboardState;
use crate::fault_log::FaultLogStore;
use crate::tui::TuiApp;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let param = config::CliParams::parse();
    logging::init_tracing(&param.log_file)?;

    let (tx, mut rx) = broadcast::channel::<Command>(256);
    let (exit_tx, _) = broadcast::channel::<()>(4);

    let connector = WebSocketConnector::new(param.endpoint())?;
    info!(
        endpoint = connector.endpoint(),
        reconnect_delay_ms = param.reconnect_delay().as_millis() as u64,
        "starting dashboard"
    );
    let mut manager = ConnectionManager::new(connector, param.reconnect_delay(), tx);
    let connection_rx = manager.subscribe_state();
    let mut manager_exit_rx = exit_tx.subscribe();
    let manager_task = task::spawn(async move {
        manager.run(&mut manager_exit_rx).await;
        manager.state()
    });

    let state = DashboardState::new(param.initial_capital, param.news_capacity());
    let mut app = TuiApp::new(state, Some(FaultLogStore::new(param.fault_log.clone())))
        .with_connection_watch(connection_rx);
    let app_result = tokio::select! {
        result = app.run(&mut rx) => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };
    let _ = exit_tx.send(());
    app.dispose();

    match tokio::time::timeout(Duration::from_secs(2), manager_task).await {
        Ok(Ok(state)) => info!(%state, "connection task stopped"),
        Ok(Err(err)) => warn!(error = %err, "connection task ended abnormally"),
        Err(_) => warn!("connection task did not stop in time"),
    }
    info!("dashboard stopped");
    app_result.map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}
