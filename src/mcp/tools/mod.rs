pub mod extract_url;

pub use extract_url::*;

use crate::connectors::browser::BrowserConnector;
use crate::mcp::registry::{RegistryError, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;

/// Registry with every tool this server exposes
pub fn build_registry(
    browser: Arc<dyn BrowserConnector>,
    navigation_timeout: Duration,
) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ExtractUrlTool::new(browser, navigation_timeout)))?;
    Ok(registry)
}
