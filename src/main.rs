use anyhow::Context;
use std::net::TcpListener;
use std::sync::Arc;
use web_scraper::configuration::get_configuration;
use web_scraper::connectors::ChromeConnector;
use web_scraper::startup::run;
use web_scraper::telemetry::{get_subscriber, init_subscriber};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = get_subscriber("web-scraper".into(), "info".into());
    init_subscriber(subscriber)?;

    let settings = get_configuration().context("Failed to read configuration.")?;

    let browser = Arc::new(ChromeConnector::new(&settings.browser));

    let address = format!("{}:{}", settings.app_host, settings.app_port);
    let listener =
        TcpListener::bind(&address).with_context(|| format!("failed to bind to {}", address))?;
    tracing::info!("MCP Server running on port {}", settings.app_port);

    run(listener, settings, browser).await?.await?;

    Ok(())
}
