use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use vetsched::engine::{Engine, Fixture, InMemoryStore};
use vetsched::notify::{self, NotifyHub};
use vetsched::request;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries one JSON response per request line.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let metrics_port: Option<u16> = std::env::var("VETSCHED_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    vetsched::observability::init(metrics_port);

    let fixture_path = std::env::var("VETSCHED_FIXTURE").ok();
    let fixture = match &fixture_path {
        Some(path) => serde_json::from_str::<Fixture>(&std::fs::read_to_string(path)?)?,
        None => Fixture::default(),
    };
    let store = Arc::new(InMemoryStore::from_fixture(fixture)?);
    let hub = Arc::new(NotifyHub::new());
    let engine = Engine::new(store, hub.clone());
    tokio::spawn(notify::run_pruner(hub, Duration::from_secs(60)));

    info!("vetsched ready");
    info!("  fixture: {}", fixture_path.as_deref().unwrap_or("none"));
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = request::handle_line(&engine, &line).await;
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                stdout.write_all(&out).await?;
                stdout.flush().await?;
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!("vetsched stopped");
    Ok(())
}
