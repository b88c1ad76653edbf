use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::connectors::browser::{BrowserConnector, BrowserError, BrowserHandle};
use crate::mcp::protocol::{Tool, ToolContent};
use crate::mcp::registry::{ToolContext, ToolHandler};

pub const EXTRACT_URL_TOOL: &str = "extract-url";

/// Render a page in a headless browser and return its visible text
pub struct ExtractUrlTool {
    browser: Arc<dyn BrowserConnector>,
    navigation_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct Args {
    url: String,
}

impl ExtractUrlTool {
    pub fn new(browser: Arc<dyn BrowserConnector>, navigation_timeout: Duration) -> Self {
        Self {
            browser,
            navigation_timeout,
        }
    }

    /// Launch a browser, read the page and close the browser on every path
    async fn extract(&self, url: &Url) -> Result<String, BrowserError> {
        let mut browser = self.browser.launch().await?;

        let outcome = self.read_page(browser.as_mut(), url).await;

        if let Err(e) = browser.close().await {
            tracing::warn!("Failed to close browser: {}", e);
        }

        outcome
    }

    async fn read_page(
        &self,
        browser: &mut dyn BrowserHandle,
        url: &Url,
    ) -> Result<String, BrowserError> {
        let page = browser.new_page().await?;

        tokio::time::timeout(self.navigation_timeout, page.goto(url))
            .await
            .map_err(|_| BrowserError::NavigationTimeout(self.navigation_timeout))??;

        page.inner_text().await
    }
}

#[async_trait]
impl ToolHandler for ExtractUrlTool {
    async fn execute(&self, args: Value, context: &ToolContext) -> Result<ToolContent, String> {
        let params: Args =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
        let url = Url::parse(&params.url).map_err(|e| format!("Invalid URL: {}", e))?;

        tracing::info!(
            session_id = %context.session_id,
            url = %url,
            "Extracting full content"
        );

        let text = self.extract(&url).await.map_err(|e| e.to_string())?;

        tracing::info!(url = %url, chars = text.len(), "Extracted page content");

        Ok(ToolContent::Text { text })
    }

    fn schema(&self) -> Tool {
        Tool {
            name: EXTRACT_URL_TOOL.to_string(),
            description: "Load a web page in a headless browser and return its visible text"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "format": "uri",
                        "description": "Absolute URL of the page to extract"
                    }
                },
                "required": ["url"]
            }),
        }
    }

    fn failure_message(&self, error: &str) -> String {
        format!("Failed to extract content: {}", error)
    }
}
