use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use roomgate::auth::ApproverGate;
use roomgate::clock::{SystemClock, TimeWindow};
use roomgate::config::Config;
use roomgate::console::{Console, Reply, parse_command};
use roomgate::engine::Engine;
use roomgate::limits::OTP_TTL_SECS;
use roomgate::mailer::{DisabledSink, NotificationSink, SmtpSink};
use roomgate::model::default_rooms;
use roomgate::notify::NotifyHub;
use roomgate::rate_limit::{JsonCounterStore, RateLimiter};
use roomgate::store::SnapshotStore;
use roomgate::workflow::ReservationWorkflow;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    roomgate::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(SnapshotStore::open(&config.snapshot_path())?);
    let counters = Arc::new(JsonCounterStore::open(&config.rate_limit_path())?);
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(store, default_rooms(), TimeWindow::default(), notify)?);

    let sink: Arc<dyn NotificationSink> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpSink::new(
            smtp,
            &config.brand,
            OTP_TTL_SECS / 60,
            config.delivery_timeout,
        )?),
        None => {
            warn!("no SMTP host configured; gated rooms cannot be booked");
            Arc::new(DisabledSink)
        }
    };

    let workflow = Arc::new(ReservationWorkflow::new(
        engine,
        RateLimiter::new(counters, config.daily_limit),
        sink,
        Arc::new(SystemClock),
        config.workflow_settings(),
    )?);

    let gate = ApproverGate::new(config.approver_pin.clone());
    if !gate.is_configured() {
        warn!("ROOMGATE_APPROVER_PIN not set; approvals cannot be entered from the console");
    }

    tokio::spawn(roomgate::reaper::run_reaper(workflow.clone(), Duration::from_secs(60)));

    info!("roomgate ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  approver: {}", config.approver_email);
    info!("  smtp: {}", if config.smtp.is_some() { "enabled" } else { "disabled" });
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown on SIGTERM/ctrl-c
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("failed to register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    let mut console = Console::new(workflow, gate);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let prompt = if console.is_unlocked() { "roomgate# " } else { "roomgate> " };
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = match parse_command(&line) {
                    Ok(cmd) => console.execute(cmd).await,
                    Err(e) => Err(e),
                };
                match reply {
                    Ok(Reply::Quit) => break,
                    Ok(Reply::Text(text)) => {
                        stdout.write_all(format!("{text}\n").as_bytes()).await?;
                    }
                    Err(e) => {
                        stdout.write_all(format!("error: {e}\n").as_bytes()).await?;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!("roomgate stopped");
    Ok(())
}
