//! Browser connector module
//!
//! Abstractions over the headless browser that renders pages for the `extract-url` tool.
//! The server only needs to launch a browser, open a page, navigate, read the page's
//! visible text and close the browser again.

use async_trait::async_trait;
use std::time::Duration;
use url::Url;

mod cdp;
pub mod chrome;
#[cfg(test)]
pub mod mock;

pub use chrome::ChromeConnector;

/// Errors reported by the browser collaborator. All of them are per-invocation failures.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Failed to launch the browser process: {0}")]
    Launch(String),
    #[error("Failed to open a new page: {0}")]
    Page(String),
    #[error("{0}")]
    Navigation(String),
    #[error("Navigation timeout of {} ms exceeded", .0.as_millis())]
    NavigationTimeout(Duration),
    #[error("{0}")]
    Evaluation(String),
    #[error("DevTools protocol error: {0}")]
    Protocol(String),
    #[error("Failed to close the browser: {0}")]
    Close(String),
}

#[async_trait]
pub trait BrowserConnector: Send + Sync {
    /// Start a new browser instance
    async fn launch(&self) -> Result<Box<dyn BrowserHandle>, BrowserError>;
}

#[async_trait]
pub trait BrowserHandle: Send {
    async fn new_page(&mut self) -> Result<Box<dyn PageHandle>, BrowserError>;

    /// Shut the browser down. Must be called on every exit path after `launch`.
    async fn close(&mut self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigate and wait until the network is almost idle
    async fn goto(&self, url: &Url) -> Result<(), BrowserError>;

    /// `document.body.innerText` of the current page
    async fn inner_text(&self) -> Result<String, BrowserError>;
}
