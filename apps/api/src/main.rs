mod config;
mod session_routes;

use config::load_config;
use dotenv::dotenv;
use gfs_llm::{make_provider, GenerativeModel};
use gfs_rag::InlineQueryEngine;
use gfs_session::{SessionService, SimulatedBackend};
use session_routes::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let cfg = load_config()?;

    let api_key_env = cfg.api_key_env();
    if std::env::var(&api_key_env).is_err() {
        // 启动不受影响，首次查询时才会报错
        tracing::warn!(
            env = %api_key_env,
            "gemini api key not set; queries will fail until it is provided"
        );
    }
    let model: Arc<dyn GenerativeModel> = Arc::from(make_provider(cfg.chat_provider()));

    let sessions = SessionService::new(
        Arc::new(SimulatedBackend::new(cfg.timings.wizard_timings())),
        Arc::new(InlineQueryEngine::new(model)),
        cfg.upload.guideline(),
    )
    .with_idle_ttl(cfg.session.idle_ttl());
    sessions.spawn_sweeper(cfg.session.sweep_interval());

    let app = session_routes::router(AppState { sessions }, cfg.upload.max_request_bytes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    tracing::info!(%addr, "gfs-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}
