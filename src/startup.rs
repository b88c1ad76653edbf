use crate::configuration::Settings;
use crate::connectors::BrowserConnector;
use crate::mcp;
use crate::routes;
use actix_cors::Cors;
use actix_web::{dev::Server, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

pub async fn run(
    listener: TcpListener,
    settings: Settings,
    browser: Arc<dyn BrowserConnector>,
) -> Result<Server, std::io::Error> {
    // Tool registry is frozen once the server starts
    let tool_registry = mcp::tools::build_registry(browser, settings.browser.navigation_timeout())
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
    tracing::info!("Registered {} MCP tool(s)", tool_registry.count());

    let executor = mcp::ToolExecutor::new(settings.mcp.tool_timeout());
    if let Some(limit) = settings.mcp.tool_timeout() {
        tracing::info!("Tool calls are limited to {:?}", limit);
    }

    let mcp_server = web::Data::new(mcp::McpServer::new(Arc::new(tool_registry), executor));
    let sessions = web::Data::new(mcp::SessionRegistry::new());
    let settings = web::Data::new(settings);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Cors::permissive())
            .service(web::scope("/health_check").service(routes::health_check))
            .service(routes::sse_handler)
            .service(routes::message_handler)
            .app_data(web::PayloadConfig::new(routes::MAXIMUM_MESSAGE_SIZE))
            .app_data(mcp_server.clone())
            .app_data(sessions.clone())
            .app_data(settings.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
