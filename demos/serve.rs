use std::error::Error;

use axum_byteserve::service::router;
use axum_byteserve::ServeConfig;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// `BYTESERVE_CONFIG` names a JSON file; without it the `BYTESERVE_*` variables apply.
fn load_config() -> Result<ServeConfig, Box<dyn Error>> {
    match std::env::var("BYTESERVE_CONFIG") {
        Ok(path) => {
            info!(%path, "reading config file");
            Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
        }
        Err(_) => Ok(ServeConfig::from_env()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    let listener = TcpListener::bind(&config.listen).await?;
    info!(addr = %listener.local_addr()?, root = %config.root.display(), "serving files");
    info!("try: curl -H 'Range: bytes=0-99' 'http://{}/videos/start?fl=<file>'", config.listen);

    axum::serve(listener, router(config)).await?;
    Ok(())
}
