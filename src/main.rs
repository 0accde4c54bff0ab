use std::sync::Arc;

use request_profiler::{ProfilerConfig, RequestProfiler};
use tracing_subscriber::EnvFilter;

mod handlers;
mod server;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// `PROFILER_CONFIG` points at a JSON file; defaults apply without it.
fn load_config() -> ProfilerConfig {
    let Ok(path) = std::env::var("PROFILER_CONFIG") else {
        return ProfilerConfig::default();
    };

    ProfilerConfig::from_json_file(&path).unwrap_or_else(|e| {
        eprintln!("❌ {e}");
        std::process::exit(1);
    })
}

#[tokio::main]
async fn main() {
    init_tracing();

    // ── 1. Profiler ──────────────────────────────────────────────
    let config = load_config();
    tracing::info!(?config, "profiler configured");
    let profiler = RequestProfiler::new(config).unwrap_or_else(|e| {
        eprintln!("❌ Invalid profiler config: {e}");
        std::process::exit(1);
    });

    // ── 2. Router ────────────────────────────────────────────────
    let app = server::create_router(Arc::new(profiler));

    // ── 3. Bind & serve ──────────────────────────────────────────
    let addr = std::env::var("PROFILER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_owned());
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("❌ Cannot bind {addr}: {e}");
        std::process::exit(1);
    });

    println!();
    println!("Server listening on http://{addr}");
    println!("Try           → curl http://{addr}/api/fib/22");
    println!("              → curl -XPOST -H 'content-type: application/json' -d '{{\"len\":50000}}' http://{addr}/api/sort");
    println!();

    axum::serve(listener, app)
        .await
        .expect("Server exited with error");
}
