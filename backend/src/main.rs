use backend::{app::App, config::AppConfig, server};
use common::logger::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let config = AppConfig::from_env()?;
    let is_production = config.env == "production";
    init_tracing(is_production, &config.log_level);

    info!("starting order execution engine");

    let app = App::build(config.clone()).await?;
    let background = app.spawn_background();

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.host, config.port))
        .await?;
    info!(host = %config.host, port = config.port, "listening");

    axum::serve(listener, server::router(app.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    app.shutdown().await?;
    for handle in background {
        handle.abort();
    }

    Ok(())
}
