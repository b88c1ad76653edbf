use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use url::Url;

use super::cdp::CdpClient;
use super::{BrowserConnector, BrowserError, BrowserHandle, PageHandle};
use crate::configuration::BrowserSettings;

const EXTRACT_VISIBLE_TEXT: &str = "document.body.innerText";

/// Looked up on `PATH` when no executable is configured
const CHROME_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

const STARTUP_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Launches a fresh Chrome/Chromium process per invocation and drives it over DevTools
pub struct ChromeConnector {
    executable: Option<String>,
    headless: bool,
    command_timeout: Duration,
}

impl ChromeConnector {
    pub fn new(settings: &BrowserSettings) -> Self {
        Self {
            executable: settings.executable.clone(),
            headless: settings.headless,
            command_timeout: settings.navigation_timeout(),
        }
    }

    fn spawn(&self, args: &[String]) -> Result<Child, BrowserError> {
        let candidates: Vec<&str> = match &self.executable {
            Some(path) => vec![path.as_str()],
            None => CHROME_CANDIDATES.to_vec(),
        };

        for candidate in candidates {
            let spawned = Command::new(candidate)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn();

            match spawned {
                Ok(child) => {
                    tracing::debug!(executable = candidate, "Browser process started");
                    return Ok(child);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(BrowserError::Launch(format!("{}: {}", candidate, e)));
                }
            }
        }

        Err(BrowserError::Launch(
            "no Chrome or Chromium executable found, set browser.executable".to_string(),
        ))
    }
}

#[async_trait]
impl BrowserConnector for ChromeConnector {
    #[tracing::instrument(name = "Launch headless browser", skip(self))]
    async fn launch(&self) -> Result<Box<dyn BrowserHandle>, BrowserError> {
        let profile = tempfile::tempdir()
            .map_err(|e| BrowserError::Launch(format!("failed to create profile directory: {}", e)))?;
        let port = free_port().await?;

        let process = self.spawn(&chrome_args(port, profile.path(), self.headless))?;
        let browser = ChromeBrowser {
            process,
            port,
            command_timeout: self.command_timeout,
            _profile: profile,
        };

        // on failure the process is killed when `browser` drops
        browser.wait_until_ready().await?;

        Ok(Box::new(browser))
    }
}

struct ChromeBrowser {
    process: Child,
    port: u16,
    command_timeout: Duration,
    _profile: TempDir,
}

impl ChromeBrowser {
    fn endpoint(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    async fn wait_until_ready(&self) -> Result<(), BrowserError> {
        let url = self.endpoint("/json/version");

        let poll = async {
            loop {
                if let Ok(response) = reqwest::get(&url).await {
                    if response.status().is_success() {
                        return;
                    }
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(STARTUP_TIMEOUT, poll).await.map_err(|_| {
            BrowserError::Launch(format!(
                "DevTools endpoint not ready after {}s",
                STARTUP_TIMEOUT.as_secs()
            ))
        })
    }

    /// WebSocket URL of the tab Chrome opened at startup
    async fn page_ws_url(&self) -> Result<String, BrowserError> {
        let url = self.endpoint("/json/list");

        for attempt in 0..10 {
            if attempt > 0 {
                tokio::time::sleep(POLL_INTERVAL).await;
            }

            let targets = match reqwest::get(&url).await {
                Ok(response) => response.json::<Vec<Value>>().await.unwrap_or_default(),
                Err(_) => continue,
            };
            if let Some(ws_url) = page_target(&targets) {
                return Ok(ws_url);
            }
        }

        Err(BrowserError::Page("no page target found".to_string()))
    }
}

#[async_trait]
impl BrowserHandle for ChromeBrowser {
    async fn new_page(&mut self) -> Result<Box<dyn PageHandle>, BrowserError> {
        let ws_url = self.page_ws_url().await?;
        let cdp = CdpClient::connect(&ws_url, self.command_timeout).await?;
        cdp.enable("Page").await?;
        cdp.enable("Runtime").await?;
        cdp.send_command("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
            .await?;

        Ok(Box::new(ChromePage { cdp }))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.process
            .kill()
            .await
            .map_err(|e| BrowserError::Close(e.to_string()))
    }
}

struct ChromePage {
    cdp: CdpClient,
}

#[async_trait]
impl PageHandle for ChromePage {
    async fn goto(&self, url: &Url) -> Result<(), BrowserError> {
        let mut lifecycle = self.cdp.subscribe("Page.lifecycleEvent").await;

        let result = self
            .cdp
            .send_command("Page.navigate", json!({ "url": url.as_str() }))
            .await
            .map_err(|e| BrowserError::Navigation(e.to_string()))?;

        if let Some(reason) = navigation_error(&result) {
            return Err(BrowserError::Navigation(format!("{} at {}", reason, url)));
        }

        let mut watch = IdleWatch::new(&result);
        while let Some(event) = lifecycle.recv().await {
            if watch.observe(&event) {
                return Ok(());
            }
        }

        Err(BrowserError::Navigation(format!(
            "page closed while loading {}",
            url
        )))
    }

    async fn inner_text(&self) -> Result<String, BrowserError> {
        let result = self
            .cdp
            .send_command(
                "Runtime.evaluate",
                json!({ "expression": EXTRACT_VISIBLE_TEXT, "returnByValue": true }),
            )
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;

        evaluated_string(&result)
    }
}

fn chrome_args(port: u16, profile: &Path, headless: bool) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", port),
        format!("--user-data-dir={}", profile.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--password-store=basic".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

async fn free_port() -> Result<u16, BrowserError> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| BrowserError::Launch(format!("failed to reserve a debugging port: {}", e)))?;
    listener
        .local_addr()
        .map(|address| address.port())
        .map_err(|e| BrowserError::Launch(e.to_string()))
}

fn page_target(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|target| target.get("type").and_then(Value::as_str) == Some("page"))
        .find_map(|target| target.get("webSocketDebuggerUrl").and_then(Value::as_str))
        .map(str::to_string)
}

/// `Page.navigate` reports network failures in `errorText` instead of a protocol error
fn navigation_error(result: &Value) -> Option<&str> {
    result
        .get("errorText")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

/// Tracks the main frame's current document until Chrome reports it almost idle
/// (at most two requests in flight for 500ms).
///
/// A page that replaces itself (script or meta refresh) starts a new loader on the same
/// frame, announced by an `init` lifecycle event; the watch follows it.
struct IdleWatch {
    frame: Option<String>,
    loader: Option<String>,
}

impl IdleWatch {
    fn new(navigation: &Value) -> Self {
        Self {
            frame: str_field(navigation, "frameId").map(str::to_string),
            loader: str_field(navigation, "loaderId").map(str::to_string),
        }
    }

    /// Feed one `Page.lifecycleEvent`; true once the navigation is settled
    fn observe(&mut self, event: &Value) -> bool {
        let field = |name| str_field(event, name);

        if self.frame.is_some() && field("frameId") != self.frame.as_deref() {
            return false;
        }

        match field("name") {
            Some("init") => {
                if let Some(loader) = field("loaderId") {
                    self.loader = Some(loader.to_string());
                }
                false
            }
            Some("networkAlmostIdle") => {
                self.loader.is_none() || field("loaderId") == self.loader.as_deref()
            }
            _ => false,
        }
    }
}

fn str_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value.get(name).and_then(Value::as_str)
}

fn evaluated_string(result: &Value) -> Result<String, BrowserError> {
    if let Some(details) = result.get("exceptionDetails") {
        let message = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("script threw");
        return Err(BrowserError::Evaluation(message.to_string()));
    }

    match result.pointer("/result/value") {
        Some(Value::String(text)) => Ok(text.clone()),
        _ => Err(BrowserError::Evaluation(
            "page has no readable body".to_string(),
        )),
    }
}
