use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

use super::executor::ToolExecutor;
use super::protocol::{
    negotiate_protocol_version, CallToolRequest, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ServerCapabilities, ServerInfo,
    ToolListResponse, ToolsCapability, JSONRPC_VERSION,
};
use super::registry::{ToolContext, ToolRegistry};
use super::session::SessionRegistry;
use super::transport::{Outbound, SseFrame};

pub const SERVER_NAME: &str = "web-scraper-new";

/// MCP method dispatch shared by every session
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
}

impl McpServer {
    pub fn new(registry: Arc<ToolRegistry>, executor: ToolExecutor) -> Self {
        Self { registry, executor }
    }

    /// Process one session's messages in arrival order until its inbound queue closes.
    ///
    /// The queue closes once the session has been removed from the registry and the
    /// last in-flight `POST /messages` handler has let go of it.
    pub async fn serve(
        self: Arc<Self>,
        session_id: String,
        outbound: Outbound,
        mut requests: mpsc::Receiver<JsonRpcRequest>,
        sessions: Arc<SessionRegistry>,
    ) {
        tracing::debug!(session_id = %session_id, "MCP session engine started");

        while let Some(request) = requests.recv().await {
            let Some(response) = self.handle_jsonrpc(request, &session_id).await else {
                continue;
            };

            let frame = match SseFrame::message(&response) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("[MCP] Failed to encode response: {}", e);
                    continue;
                }
            };

            tracing::info!(
                session_id = %session_id,
                "[MCP] Sending JSON-RPC response: id={:?}, has_result={}, has_error={}",
                response.id,
                response.result.is_some(),
                response.error.is_some()
            );

            if let Err(e) = outbound.send(frame).await {
                tracing::warn!(session_id = %session_id, "Dropping response: {}", e);
                sessions.close(&session_id);
                break;
            }
        }

        tracing::debug!(session_id = %session_id, "MCP session engine stopped");
    }

    /// Handle JSON-RPC request
    pub async fn handle_jsonrpc(
        &self,
        req: JsonRpcRequest,
        session_id: &str,
    ) -> Option<JsonRpcResponse> {
        // Notifications arrive without an id and must not receive a response per JSON-RPC 2.0
        if req.is_notification() {
            if req.method == "notifications/initialized" {
                tracing::info!(session_id = %session_id, "MCP client finished initialization");
            } else {
                tracing::debug!("Ignoring notification without id: method={}", req.method);
            }
            return None;
        }

        if req.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(req.id, JsonRpcError::invalid_request()));
        }

        let response = match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            "ping" => JsonRpcResponse::success(req.id, serde_json::json!({})),
            "tools/list" => self.handle_tools_list(req),
            "tools/call" => self.handle_tools_call(req, session_id).await,
            _ => JsonRpcResponse::error(req.id, JsonRpcError::method_not_found(&req.method)),
        };

        Some(response)
    }

    /// Handle MCP initialize method
    fn handle_initialize(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let params: InitializeParams = match parse_params(req.params) {
            Ok(params) => params,
            Err(error) => return JsonRpcResponse::error(req.id, error),
        };

        tracing::info!(
            "MCP client initialized: protocol_version={}, client={}",
            params.protocol_version,
            params
                .client_info
                .as_ref()
                .map(|c| c.name.as_str())
                .unwrap_or("unknown")
        );

        let result = InitializeResult {
            protocol_version: negotiate_protocol_version(&params.protocol_version).to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        JsonRpcResponse::from_result(req.id, &result)
    }

    /// Handle tools/list method
    fn handle_tools_list(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let tools = self.registry.list_tools();

        tracing::debug!("Listing {} available tools", tools.len());

        JsonRpcResponse::from_result(req.id, &ToolListResponse { tools })
    }

    /// Handle tools/call method
    async fn handle_tools_call(&self, req: JsonRpcRequest, session_id: &str) -> JsonRpcResponse {
        let call_req: CallToolRequest = match parse_params(req.params) {
            Ok(params) => params,
            Err(error) => return JsonRpcResponse::error(req.id, error),
        };

        let descriptor = match self.registry.resolve(&call_req.name) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!("{}", e);
                return JsonRpcResponse::error(
                    req.id,
                    JsonRpcError::tool_not_found(&call_req.name),
                );
            }
        };

        let tool_span = tracing::info_span!(
            "mcp_tool_call",
            tool = %call_req.name,
            session_id = %session_id
        );

        let context = ToolContext {
            session_id: session_id.to_string(),
        };
        let response = self
            .executor
            .invoke(descriptor, call_req.arguments, &context)
            .instrument(tool_span)
            .await;

        JsonRpcResponse::from_result(req.id, &response)
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    match params {
        Some(p) => serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(&e.to_string())),
        None => Err(JsonRpcError::invalid_params("Missing params")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::browser::mock::{MockBrowserConnector, MockPage};
    use crate::mcp::tools;
    use crate::mcp::transport;
    use serde_json::json;
    use std::time::Duration;

    fn server_with(browser: Arc<MockBrowserConnector>) -> McpServer {
        let registry = tools::build_registry(browser, Duration::from_secs(20)).unwrap();
        McpServer::new(Arc::new(registry), ToolExecutor::default())
    }

    fn request(id: i64, method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(Some(json!(id)), method, params)
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let server = server_with(Arc::new(MockBrowserConnector::default()));
        let params = json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "inspector", "version": "0.1.0"}
        });

        let response = server
            .handle_jsonrpc(request(1, "initialize", Some(params)), "s1")
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
    }

    #[tokio::test]
    async fn initialize_without_params_is_invalid() {
        let server = server_with(Arc::new(MockBrowserConnector::default()));

        let response = server
            .handle_jsonrpc(request(1, "initialize", None), "s1")
            .await
            .unwrap();

        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let server = server_with(Arc::new(MockBrowserConnector::default()));
        let notification = JsonRpcRequest::new(None, "notifications/initialized", None);

        assert!(server.handle_jsonrpc(notification, "s1").await.is_none());
    }

    #[tokio::test]
    async fn ping_returns_empty_object() {
        let server = server_with(Arc::new(MockBrowserConnector::default()));

        let response = server.handle_jsonrpc(request(7, "ping", None), "s1").await.unwrap();

        assert_eq!(response.id, Some(json!(7)));
        assert_eq!(response.result, Some(json!({})));
    }

    #[tokio::test]
    async fn unknown_method() {
        let server = server_with(Arc::new(MockBrowserConnector::default()));

        let response = server
            .handle_jsonrpc(request(2, "resources/list", None), "s1")
            .await
            .unwrap();

        assert_eq!(response.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_jsonrpc_version_is_invalid_request() {
        let server = server_with(Arc::new(MockBrowserConnector::default()));
        let mut req = request(3, "ping", None);
        req.jsonrpc = "1.0".to_string();

        let response = server.handle_jsonrpc(req, "s1").await.unwrap();

        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn tools_list_exposes_extract_url() {
        let server = server_with(Arc::new(MockBrowserConnector::default()));

        let response = server
            .handle_jsonrpc(request(4, "tools/list", None), "s1")
            .await
            .unwrap();

        let tools = response.result.unwrap()["tools"].clone();
        assert_eq!(tools.as_array().unwrap().len(), 1);
        assert_eq!(tools[0]["name"], "extract-url");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["url"]));
    }

    #[tokio::test]
    async fn tools_call_extracts_text() {
        let browser = Arc::new(MockBrowserConnector::new(MockPage::Text(
            "Example Domain".to_string(),
        )));
        let server = server_with(browser.clone());
        let params = json!({"name": "extract-url", "arguments": {"url": "https://example.com"}});

        let response = server
            .handle_jsonrpc(request(5, "tools/call", Some(params)), "s1")
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["content"][0]["text"], "Example Domain");
        assert!(result.get("isError").is_none());
        assert_eq!(browser.launches(), 1);
        assert_eq!(browser.closes(), 1);
    }

    #[tokio::test]
    async fn tools_call_with_malformed_url_never_launches_browser() {
        let browser = Arc::new(MockBrowserConnector::default());
        let server = server_with(browser.clone());
        let params = json!({"name": "extract-url", "arguments": {"url": "not-a-url"}});

        let response = server
            .handle_jsonrpc(request(6, "tools/call", Some(params)), "s1")
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Invalid arguments for tool extract-url"));
        assert_eq!(browser.launches(), 0);
    }

    #[tokio::test]
    async fn tools_call_unknown_tool() {
        let server = server_with(Arc::new(MockBrowserConnector::default()));
        let params = json!({"name": "screenshot", "arguments": {}});

        let response = server
            .handle_jsonrpc(request(8, "tools/call", Some(params)), "s1")
            .await
            .unwrap();

        let error = response.error.unwrap();
        assert_eq!(error.code, JsonRpcError::TOOL_NOT_FOUND);
        assert_eq!(error.message, "Tool not found: screenshot");
    }

    #[tokio::test]
    async fn serve_answers_in_order_and_stops_when_queue_closes() {
        let server = Arc::new(server_with(Arc::new(MockBrowserConnector::default())));
        let sessions = Arc::new(SessionRegistry::new());
        let (outbound, mut frames) = transport::channel(8);
        let (inbound, requests) = mpsc::channel(8);

        let engine = tokio::spawn(server.serve(
            "s1".to_string(),
            outbound,
            requests,
            sessions.clone(),
        ));

        inbound.send(request(1, "ping", None)).await.unwrap();
        inbound
            .send(JsonRpcRequest::new(None, "notifications/initialized", None))
            .await
            .unwrap();
        inbound.send(request(2, "tools/list", None)).await.unwrap();
        drop(inbound);

        engine.await.unwrap();

        let first = frames.recv().await.unwrap();
        let second = frames.recv().await.unwrap();
        assert!(matches!(first, SseFrame::Message(ref json) if json.contains(r#""id":1"#)));
        assert!(matches!(second, SseFrame::Message(ref json) if json.contains(r#""id":2"#)));
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn serve_tears_down_session_when_stream_is_gone() {
        let server = Arc::new(server_with(Arc::new(MockBrowserConnector::default())));
        let sessions = Arc::new(SessionRegistry::new());
        let (outbound, frames) = transport::channel(8);
        let (inbound, requests) = mpsc::channel(8);
        let session = sessions.open(outbound.clone(), inbound.clone());
        drop(frames);

        let engine = tokio::spawn(server.serve(
            session.id.clone(),
            outbound,
            requests,
            sessions.clone(),
        ));

        inbound.send(request(1, "ping", None)).await.unwrap();
        engine.await.unwrap();

        assert!(sessions.lookup(&session.id).is_err());
    }
}
