// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Certvault: custody terminal for hardware certificate tokens.
//
// Entry point. Initialises logging and backend services, starts the periodic
// overdue scan, then reads console commands from stdin.

mod console;
mod services;

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use console::{Command, Console};
use services::app_services::AppServices;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Certvault starting");

    let svc = match AppServices::init() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "persistent storage failed, using in-memory fallback");
            match AppServices::fallback() {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "fallback init failed");
                    std::process::exit(1);
                }
            }
        }
    };

    tracing::info!(data_dir = %svc.data_dir().display(), "services ready");

    tokio::spawn(overdue_scanner(svc.clone()));

    if let Err(e) = run_console(Console::new(svc)).await {
        tracing::error!(error = %e, "console stopped");
    }
    tracing::info!("Certvault stopped");
}

/// Scan for overdue certificates every `scan_interval_secs`.
async fn overdue_scanner(svc: AppServices) {
    let period = Duration::from_secs(svc.config().scan_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let report = svc.run_overdue_scan().await.value;
        if !report.overdue.is_empty() {
            tracing::info!(
                overdue = report.overdue.len(),
                alerted = report.alerted.len(),
                "overdue scan"
            );
        }
    }
}

async fn run_console(mut console: Console) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(b"Certvault console. Type `help` for commands.\n> ")
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let output = match Command::parse(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => console.execute(command).await.to_string(),
            Ok(None) => String::new(),
            Err(usage) => usage,
        };
        if !output.is_empty() {
            stdout.write_all(output.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }
    Ok(())
}
