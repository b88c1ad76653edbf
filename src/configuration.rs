use std::time::Duration;

/// Port used when neither `PORT` nor the configuration file set one
pub const DEFAULT_PORT: u16 = 3002;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Settings {
    pub app_host: String,
    pub app_port: u16,
    pub mcp: McpSettings,
    pub browser: BrowserSettings,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct McpSettings {
    /// Idle interval between SSE keep-alive comments
    pub keep_alive_secs: u64,
    /// Buffered frames per session in each direction
    pub channel_capacity: usize,
    /// Upper bound for a whole tool call. Unset means only page navigation is bounded.
    #[serde(default)]
    pub tool_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BrowserSettings {
    pub headless: bool,
    pub navigation_timeout_secs: u64,
    /// Chrome/Chromium binary; auto-detected when unset
    #[serde(default)]
    pub executable: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_host: "0.0.0.0".to_string(),
            app_port: DEFAULT_PORT,
            mcp: McpSettings::default(),
            browser: BrowserSettings::default(),
        }
    }
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            keep_alive_secs: 15,
            channel_capacity: 64,
            tool_timeout_secs: None,
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            navigation_timeout_secs: 20,
            executable: None,
        }
    }
}

impl McpSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }
}

impl BrowserSettings {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

/// Parse the value of the `PORT` environment variable
pub fn parse_port(value: &str) -> Result<u16, config::ConfigError> {
    value.trim().parse::<u16>().map_err(|_| {
        config::ConfigError::Message(format!("PORT must be a valid port number, got {:?}", value))
    })
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let defaults = Settings::default();

    let settings = config::Config::builder()
        .set_default("app_host", defaults.app_host)?
        .set_default("app_port", i64::from(defaults.app_port))?
        .set_default("mcp.keep_alive_secs", defaults.mcp.keep_alive_secs)?
        .set_default("mcp.channel_capacity", defaults.mcp.channel_capacity as u64)?
        .set_default("browser.headless", defaults.browser.headless)?
        .set_default(
            "browser.navigation_timeout_secs",
            defaults.browser.navigation_timeout_secs,
        )?
        // configuration.yaml / .json / .toml next to the binary, optional
        .add_source(config::File::with_name("configuration").required(false))
        // APP__MCP__KEEP_ALIVE_SECS=30 etc.
        .add_source(
            config::Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut config: Settings = settings.try_deserialize()?;

    if let Ok(port) = std::env::var("PORT") {
        config.app_port = parse_port(&port)?;
    }

    Ok(config)
}
