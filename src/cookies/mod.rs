//! Session cookie loading and inspection
//!
//! A [`CookieJar`] is the credential the session worker holds. It can be
//! loaded from a raw header string, a browser JSON export, or a browser
//! profile, and is always scoped to the site domain before use.

use crate::config::{Browser, CookieSource};
use crate::error::{BilimodError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod firefox;

/// Cookie carrying the CSRF token required by state-changing API calls.
pub const CSRF_COOKIE: &str = "bili_jct";

/// Analytics cookie prefixes hidden from listings.
const NOISE_PREFIXES: &[&str] = &["Hm_lvt_"];

/// Cookie names hidden from listings.
const NOISE_NAMES: &[&str] = &["GIFT_BLOCK_COOKIE", "bmg_af_switch", "bmg_src_def_domain"];

/// Represents a browser cookie, in the shape browser exports use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
    #[serde(
        rename = "expirationDate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expires: Option<f64>,
}

fn default_path() -> String {
    "/".to_string()
}

impl Cookie {
    /// True when this cookie is sent to `domain` or any of its subdomains.
    pub fn belongs_to(&self, domain: &str) -> bool {
        let own = self.domain.trim_start_matches('.').to_ascii_lowercase();
        let domain = domain.trim_start_matches('.').to_ascii_lowercase();
        own == domain || own.ends_with(&format!(".{}", domain))
    }

    fn is_noise(&self) -> bool {
        NOISE_NAMES.contains(&self.name.as_str())
            || NOISE_PREFIXES.iter().any(|p| self.name.starts_with(p))
    }
}

/// Counters shown next to a cookie listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieStats {
    pub total: usize,
    pub http_only: usize,
    pub secure: usize,
    pub filtered: usize,
}

/// Ordered set of cookies, unique by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    /// Build a jar. When a name repeats, the first position is kept and the
    /// last value wins.
    pub fn new(cookies: Vec<Cookie>) -> Self {
        let mut unique: Vec<Cookie> = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            match unique.iter_mut().find(|c| c.name == cookie.name) {
                Some(existing) => *existing = cookie,
                None => unique.push(cookie),
            }
        }
        Self { cookies: unique }
    }

    /// Load the jar for `site_domain` from the configured source.
    pub async fn load(source: &CookieSource, site_domain: &str) -> Result<Self> {
        let jar = match source {
            CookieSource::Header(header) => Self::from_header(header, site_domain)?,
            CookieSource::JsonFile(path) => Self::from_json_file(path)?,
            CookieSource::Browser(config) => match config.browser {
                Browser::Firefox => {
                    let config = config.clone();
                    let domain = site_domain.to_string();
                    let cookies = tokio::task::spawn_blocking(move || {
                        firefox::extract_cookies(&config, &domain)
                    })
                    .await
                    .map_err(|e| {
                        BilimodError::BrowserCookie(format!("Cookie reader task failed: {}", e))
                    })??;
                    Self::new(cookies)
                }
            },
        };

        let jar = jar.scoped_to(site_domain);
        log::debug!(
            "Loaded {} cookies for {} from {}",
            jar.len(),
            site_domain,
            describe_source(source)
        );
        Ok(jar)
    }

    /// Parse a `name=value; name2=value2` header. Each cookie is attributed
    /// to `domain`.
    pub fn from_header(header: &str, domain: &str) -> Result<Self> {
        let header = header.trim();
        let header = header
            .strip_prefix("Cookie:")
            .or_else(|| header.strip_prefix("cookie:"))
            .unwrap_or(header);

        let mut cookies = Vec::new();
        for pair in header.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                BilimodError::Config(format!("Invalid cookie pair: '{}'", pair))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(BilimodError::Config(format!("Invalid cookie pair: '{}'", pair)));
            }
            cookies.push(Cookie {
                name: name.to_string(),
                value: value.trim().to_string(),
                domain: format!(".{}", domain.trim_start_matches('.')),
                path: default_path(),
                secure: false,
                http_only: false,
                same_site: None,
                expires: None,
            });
        }
        Ok(Self::new(cookies))
    }

    /// Parse a JSON array of cookies as written by `bilimod cookies --json`
    /// or a browser extension export.
    pub fn from_json(data: &str) -> Result<Self> {
        let cookies: Vec<Cookie> = serde_json::from_str(data)?;
        Ok(Self::new(cookies))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(BilimodError::FileNotFound(format!(
                "Cookie file not found: {:?}",
                path
            )));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Keep only cookies sent to `domain`.
    pub fn scoped_to(self, domain: &str) -> Self {
        Self {
            cookies: self
                .cookies
                .into_iter()
                .filter(|c| c.belongs_to(domain))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    /// The CSRF token, if the session is signed in.
    pub fn csrf_token(&self) -> Option<&str> {
        self.get(CSRF_COOKIE)
            .map(|c| c.value.as_str())
            .filter(|v| !v.is_empty())
    }

    /// `Cookie` header value for every cookie in the jar.
    pub fn to_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Cookies worth showing, with tracking noise removed.
    pub fn visible(&self) -> (Vec<&Cookie>, CookieStats) {
        let visible: Vec<&Cookie> = self.cookies.iter().filter(|c| !c.is_noise()).collect();
        let stats = CookieStats {
            total: visible.len(),
            http_only: visible.iter().filter(|c| c.http_only).count(),
            secure: visible.iter().filter(|c| c.secure).count(),
            filtered: self.cookies.len() - visible.len(),
        };
        (visible, stats)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

fn describe_source(source: &CookieSource) -> String {
    match source {
        CookieSource::Header(_) => "cookie header".to_string(),
        CookieSource::JsonFile(path) => format!("{:?}", path),
        CookieSource::Browser(config) => format!("{} profile", config.browser),
    }
}
