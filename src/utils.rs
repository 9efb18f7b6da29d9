//! Utility functions and helpers

use crate::error::{BilimodError, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// URL validation and parsing utilities
pub struct UrlUtils;

impl UrlUtils {
    /// Validate and normalize URL
    pub fn validate_url(input: &str) -> Result<Url> {
        // Add https:// if no scheme is provided
        let url_str = if input.contains("://") {
            input.to_string()
        } else {
            format!("https://{}", input)
        };

        let url = Url::parse(&url_str)
            .map_err(|e| BilimodError::InvalidUrl(format!("Invalid URL '{}': {}", input, e)))?;
        if url.host_str().is_none() {
            return Err(BilimodError::InvalidUrl(format!("URL '{}' has no host", input)));
        }
        Ok(url)
    }

    /// Domain used for cookie scoping: the host without a leading `www.`.
    pub fn site_domain(url: &Url) -> Option<String> {
        let host = url.host_str()?.to_ascii_lowercase();
        Some(match host.strip_prefix("www.") {
            Some(rest) => rest.to_string(),
            None => host,
        })
    }
}

/// File system utilities
pub struct FileUtils;

impl FileUtils {
    /// Expand tilde (~) in file paths
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        let rest = match path.strip_prefix('~') {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
            _ => return Ok(PathBuf::from(path)),
        };
        let home_dir = dirs::home_dir()
            .ok_or_else(|| BilimodError::Config("Cannot determine home directory".to_string()))?;
        Ok(home_dir.join(rest))
    }

    /// Check if file exists and is readable
    pub fn check_file_readable(path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(BilimodError::FileNotFound(format!(
                "File not found: {:?}",
                path
            )));
        }

        if !path.is_file() {
            return Err(BilimodError::Config(format!("Path is not a file: {:?}", path)));
        }

        std::fs::File::open(path).map_err(|e| {
            BilimodError::PermissionDenied(format!("Cannot read file {:?}: {}", path, e))
        })?;

        Ok(())
    }

    /// Read a whole text input; `-` means stdin.
    pub fn read_text(path: &str) -> Result<String> {
        if path == "-" {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            return Ok(text);
        }
        let path = Self::expand_path(path)?;
        Self::check_file_readable(&path)?;
        Ok(std::fs::read_to_string(&path)?)
    }
}

/// String utilities
pub struct StringUtils;

impl StringUtils {
    /// Split `user:password` proxy credentials
    pub fn parse_credentials(input: &str) -> Result<(String, String)> {
        match input.split_once(':') {
            Some((user, password)) if !user.is_empty() => {
                Ok((user.to_string(), password.to_string()))
            }
            _ => Err(BilimodError::Config(format!(
                "Invalid credentials '{}'. Expected 'user:password'",
                input
            ))),
        }
    }

    /// Parse timeout values (supports suffixes like 'ms', 's', 'm', 'h')
    pub fn parse_timeout(input: &str) -> Result<Duration> {
        let input = input.trim();
        if let Ok(seconds) = input.parse::<u64>() {
            return Ok(Duration::from_secs(seconds));
        }

        if let Some(millis) = input.strip_suffix("ms") {
            let millis: u64 = millis.parse().map_err(|_| {
                BilimodError::Config(format!("Invalid timeout number: '{}'", millis))
            })?;
            return Ok(Duration::from_millis(millis));
        }

        let (number_part, unit) = if let Some(stripped) = input.strip_suffix('s') {
            (stripped, 1)
        } else if let Some(stripped) = input.strip_suffix('m') {
            (stripped, 60)
        } else if let Some(stripped) = input.strip_suffix('h') {
            (stripped, 3600)
        } else {
            return Err(BilimodError::Config(format!(
                "Invalid timeout format: '{}'. Use number with optional suffix (ms/s/m/h)",
                input
            )));
        };

        let number: u64 = number_part.parse().map_err(|_| {
            BilimodError::Config(format!("Invalid timeout number: '{}'", number_part))
        })?;

        Ok(Duration::from_secs(number * unit))
    }
}
