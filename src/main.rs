#[macro_use]
extern crate rocket;

mod api;
mod app_state;
mod config;
mod engine;
mod error;
mod prompt;
mod registry;
mod relay;
mod sse;
mod types;

use std::net::Ipv4Addr;

use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::GatewayConfig;

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("webapp_gateway=info,rocket=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };
    tracing::info!(
        port = config.port,
        endpoint = %config.inference_endpoint,
        timeout_secs = config.request_timeout.as_secs(),
        "starting gateway"
    );

    let figment = rocket::Config::figment()
        .merge(("port", config.port))
        .merge(("address", Ipv4Addr::UNSPECIFIED));
    let state = AppState::from_config(config);

    api::build(rocket::custom(figment), state)
        .launch()
        .await
        .map_err(|e| anyhow::anyhow!("server failed: {e}"))?;
    Ok(())
}
