use crate::mcp::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, SessionError, SessionRegistry, SseFrame};
use actix_web::{
    error::ResponseError, http::header, http::StatusCode, post, web, HttpRequest, HttpResponse,
};
use serde::Deserialize;
use serde_json::Value;

/// Largest message body accepted on `POST /messages`
pub const MAXIMUM_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Rejections of `POST /messages`. All of them are client errors with a plain-text body.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("No transport found for sessionId")]
    UnknownSession,
    #[error("Unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl From<SessionError> for MessageError {
    fn from(_: SessionError) -> Self {
        Self::UnknownSession
    }
}

impl ResponseError for MessageError {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}

/// Accept one JSON-RPC message for an open session.
///
/// The message is queued for the session's protocol engine and answered with
/// `202 Accepted`; the JSON-RPC response travels back over the session's event stream.
#[tracing::instrument(name = "Post MCP message", skip_all, fields(session_id))]
#[post("/messages")]
pub async fn message_handler(
    req: HttpRequest,
    query: web::Query<MessageQuery>,
    body: web::Bytes,
    sessions: web::Data<SessionRegistry>,
) -> Result<HttpResponse, MessageError> {
    let session_id = query.into_inner().session_id.unwrap_or_default();
    tracing::Span::current().record("session_id", session_id.as_str());

    let session = sessions.lookup(&session_id).map_err(|err| {
        tracing::warn!("Rejected message: {}", err);
        MessageError::from(err)
    })?;

    require_json(&req)?;

    let request = match parse_message(&body) {
        Ok(request) => request,
        Err(err) => {
            tracing::error!("[MCP] Failed to parse JSON-RPC request: {}", err);
            let parse_error = JsonRpcResponse::error(None, JsonRpcError::parse_error());
            if let Ok(frame) = SseFrame::message(&parse_error) {
                if let Err(e) = session.send(frame).await {
                    tracing::warn!("Could not report parse error to client: {}", e);
                    sessions.close(&session.id);
                }
            }
            return Err(MessageError::InvalidMessage(err));
        }
    };

    tracing::info!(
        "[MCP] Received JSON-RPC message: method={}, id={:?}",
        request.method,
        request.id
    );

    session
        .deliver(request)
        .await
        .map_err(|_| MessageError::UnknownSession)?;

    Ok(HttpResponse::Accepted()
        .content_type("text/plain; charset=utf-8")
        .body("Accepted"))
}

/// Decode one JSON-RPC message. Request ids must be strings or integers.
fn parse_message(body: &[u8]) -> Result<JsonRpcRequest, String> {
    let message: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;

    match message.get("id") {
        None | Some(Value::String(_)) => {}
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => {}
        Some(other) => return Err(format!("id must be a string or an integer, got {}", other)),
    }

    serde_json::from_value(message).map_err(|e| e.to_string())
}

fn require_json(req: &HttpRequest) -> Result<(), MessageError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let essence = content_type.split(';').next().unwrap_or_default().trim();
    if essence.eq_ignore_ascii_case("application/json") {
        Ok(())
    } else {
        Err(MessageError::UnsupportedContentType(content_type.to_string()))
    }
}
