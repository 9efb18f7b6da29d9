//! Configuration management for bilimod

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BilimodError, Result};

pub const DEFAULT_API_BASE: &str = "https://api.bilibili.com";
pub const DEFAULT_SITE_URL: &str = "https://www.bilibili.com/";
pub const DEFAULT_SITE_DOMAIN: &str = "bilibili.com";

/// Fixed wait between two consecutive moderation calls.
pub const PACING_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on waiting for a freshly opened session context to load.
pub const CONTEXT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Browsers whose cookie store can back a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Browser {
    Firefox,
}

impl FromStr for Browser {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "firefox" => Ok(Browser::Firefox),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Browser::Firefox => f.write_str("firefox"),
        }
    }
}

/// Browser cookie configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookieConfig {
    pub browser: Browser,
    pub profile: Option<String>,
    pub container: Option<String>,
}

impl BrowserCookieConfig {
    /// Parse `BROWSER[:PROFILE][::CONTAINER]`.
    pub fn parse(input: &str) -> Result<Self> {
        let (browser_part, container) = match input.split_once("::") {
            Some((head, container)) => (head, Some(container.to_string())),
            None => (input, None),
        };
        let (browser_str, profile) = match browser_part.split_once(':') {
            Some((browser, profile)) => (browser, Some(profile.to_string())),
            None => (browser_part, None),
        };

        let browser = browser_str.parse::<Browser>().map_err(|_| {
            BilimodError::Config(format!("Unsupported browser: {}", browser_str))
        })?;

        Ok(BrowserCookieConfig {
            browser,
            profile: profile.filter(|p| !p.is_empty()),
            container: container.filter(|c| !c.is_empty()),
        })
    }
}

/// Where the session worker reads its cookie jar from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieSource {
    /// Raw `name=value; name2=value2` header string.
    Header(String),
    /// JSON array as produced by a browser cookie export.
    JsonFile(PathBuf),
    /// Read straight from a browser profile.
    Browser(BrowserCookieConfig),
}

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Output configuration
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    pub file: Option<PathBuf>,
    pub silent: bool,
    pub json: bool,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base: String,
    pub site_url: String,
    pub site_domain: String,
    pub user_agent: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pacing: Duration,
    pub context_load_timeout: Duration,
    pub cookies: Option<CookieSource>,
    pub proxy: Option<ProxyConfig>,
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base: DEFAULT_API_BASE.to_string(),
            site_url: DEFAULT_SITE_URL.to_string(),
            site_domain: DEFAULT_SITE_DOMAIN.to_string(),
            user_agent: Some(format!("bilimod/{}", crate::VERSION)),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pacing: PACING_INTERVAL,
            context_load_timeout: CONTEXT_LOAD_TIMEOUT,
            cookies: None,
            proxy: None,
            output: OutputConfig::default(),
        }
    }
}
