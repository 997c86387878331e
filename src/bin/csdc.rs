//! Minimal example binary (§6 "Example-binary interface"): wires the engine
//! to stdout/stdin so it can be exercised manually. Not part of the
//! specified engine contract — logging setup follows the teacher's
//! `log.rs` (terminal + file, via `simplelog::CombinedLogger`), and the
//! command loop follows the teacher's CLI `main.rs` shape of a config
//! load followed by a single driving loop.

use std::fs::File;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use csdc::dispatch::EngineCallbacks;
use csdc::{config, Engine};
use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode, WriteLogger};

struct StdoutCallbacks;

impl EngineCallbacks for StdoutCallbacks {
    fn on_message(&self, sender_username: &str, src_ip: &str, content: &str) {
        println!("[{sender_username}@{src_ip}] {content}");
    }

    fn on_roster_changed(&self) {
        println!("(roster changed)");
    }
}

fn setup_logger(level: log::LevelFilter) -> Result<()> {
    let log_file = File::create("csdc.log").context("failed to create csdc.log")?;
    let term_config = ConfigBuilder::new().build();
    let file_config = ConfigBuilder::new().build();

    let loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(level, term_config, TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(log::LevelFilter::Debug, file_config, log_file),
    ];
    CombinedLogger::init(loggers).ok();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::load().context("failed to load configuration")?;
    setup_logger(cfg.log_level)?;
    log::info!("starting as {}", cfg.username);

    let mut engine = Engine::init(&cfg).await.context("failed to initialise engine")?;
    let callbacks = Arc::new(StdoutCallbacks);

    let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            if cmd_tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        engine.tick(callbacks.as_ref());

        if engine.is_errored() {
            log::error!("engine entered the error state; shutting down");
            break;
        }

        match cmd_rx.try_recv() {
            Ok(line) => {
                if let Err(e) = handle_command(&engine, &line).await {
                    println!("error: {e}");
                }
                if line.trim() == "/quit" {
                    break;
                }
            }
            Err(tokio::sync::mpsc::error::TryRecvError::Empty) => {}
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => break,
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    engine.shutdown().await;
    Ok(())
}

async fn handle_command(engine: &Engine, line: &str) -> Result<()> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("/send ") {
        let (peer_ip, text) = rest
            .split_once(' ')
            .context("usage: /send <ip> <text>")?;
        engine.send_text(peer_ip, text).await?;
    } else if let Some(text) = line.strip_prefix("/broadcast ") {
        engine.broadcast_text(text).await;
    } else if line == "/quit" {
        // Handled by the caller after shutdown.
    } else if !line.is_empty() {
        println!("unrecognised command: {line}");
    }
    Ok(())
}
