use crate::configuration::Settings;
use crate::mcp::{transport, McpServer, SessionRegistry};
use actix_web::{get, http::header, web, HttpResponse, Result};

/// Path announced to clients in the `endpoint` handshake event
pub const MESSAGES_PATH: &str = "/messages";

/// Open a session: register it, start its protocol engine and stream events until the
/// client goes away.
#[tracing::instrument(name = "Open MCP SSE stream", skip_all)]
#[get("/sse")]
pub async fn sse_handler(
    sessions: web::Data<SessionRegistry>,
    server: web::Data<McpServer>,
    settings: web::Data<Settings>,
) -> Result<HttpResponse> {
    let sessions = sessions.into_inner();

    let opened = transport::open(
        &sessions,
        MESSAGES_PATH,
        settings.mcp.channel_capacity,
        settings.mcp.keep_alive(),
    )
    .await
    .map_err(|err| {
        tracing::error!("Failed to open SSE session: {}", err);
        actix_web::error::ErrorInternalServerError(err)
    })?;

    tracing::info!(
        session_id = %opened.session.id,
        open_sessions = sessions.len(),
        "SSE session started"
    );

    let engine = server.into_inner().serve(
        opened.session.id.clone(),
        opened.session.outbound().clone(),
        opened.requests,
        sessions,
    );
    actix_web::rt::spawn(engine);

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(opened.stream))
}
