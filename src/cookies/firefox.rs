//! Firefox profile cookie reader
//!
//! Firefox stores cookies unencrypted in `cookies.sqlite`. The database is
//! locked while the browser runs, so it is copied to a temp dir first.

use crate::config::BrowserCookieConfig;
use crate::cookies::Cookie;
use crate::error::{BilimodError, Result};
use crate::utils::FileUtils;
use rusqlite::{Connection, Row};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const MAX_SUPPORTED_DB_SCHEMA_VERSION: i64 = 17;

/// Read every cookie for `domain` (and its subdomains) from the newest
/// matching Firefox profile.
pub fn extract_cookies(config: &BrowserCookieConfig, domain: &str) -> Result<Vec<Cookie>> {
    let roots = search_roots(config.profile.as_deref())?;
    let cookie_db = newest_path(find_cookie_dbs(&roots))
        .ok_or_else(|| BilimodError::FileNotFound("Firefox cookies database not found".to_string()))?;
    log::info!("Reading Firefox cookies from {:?}", cookie_db);

    let temp_dir = tempdir()
        .map_err(|e| BilimodError::BrowserCookie(format!("Failed to create temp dir: {}", e)))?;
    let temp_db = temp_dir.path().join("firefox-cookies.sqlite");
    fs::copy(&cookie_db, &temp_db).map_err(|e| copy_error(&cookie_db, e))?;

    let conn = Connection::open(&temp_db)
        .map_err(|e| BilimodError::BrowserCookie(format!("Failed to open cookies DB: {}", e)))?;
    let schema_version = read_schema_version(&conn);
    if schema_version > MAX_SUPPORTED_DB_SCHEMA_VERSION {
        log::warn!(
            "Firefox cookie DB schema version {} may be unsupported",
            schema_version
        );
    }

    let columns = cookie_columns(&conn)?;
    let container = resolve_container(&cookie_db, config.container.as_deref())?;

    let domain = domain.trim_start_matches('.');
    let mut query = format!(
        "SELECT host, name, value, path, {}, {}, {} FROM moz_cookies WHERE (host = ?1 OR host LIKE ?2)",
        columns.expiry, columns.secure, columns.http_only
    );
    let mut params = vec![domain.to_string(), format!("%.{}", domain)];
    match container {
        Container::Any => {}
        Container::NoneOnly => query.push_str(" AND NOT INSTR(originAttributes, 'userContextId=')"),
        Container::Specific(id) => {
            query.push_str(" AND (originAttributes LIKE ?3 OR originAttributes LIKE ?4)");
            params.push(format!("%userContextId={}", id));
            params.push(format!("%userContextId={}&%", id));
        }
    }

    let mut stmt = conn
        .prepare(&query)
        .map_err(|e| BilimodError::BrowserCookie(format!("Failed to prepare Firefox query: {}", e)))?;
    let mut rows = stmt
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(|e| BilimodError::BrowserCookie(format!("Failed to query Firefox cookies: {}", e)))?;

    let mut cookies = Vec::new();
    while let Some(row) = rows.next().map_err(|e| {
        BilimodError::BrowserCookie(format!("Failed to read Firefox cookie row: {}", e))
    })? {
        cookies.push(row_to_cookie(row, schema_version)?);
    }

    if cookies.is_empty() {
        return Err(BilimodError::BrowserCookie(format!(
            "No Firefox cookies found for {}; sign in to the site in Firefox first",
            domain
        )));
    }

    Ok(cookies)
}

fn copy_error(path: &Path, err: std::io::Error) -> BilimodError {
    if err.kind() == std::io::ErrorKind::PermissionDenied {
        BilimodError::PermissionDenied(format!("Cannot read cookies DB {:?}: {}", path, err))
    } else {
        BilimodError::BrowserCookie(format!("Failed to copy cookies DB {:?}: {}", path, err))
    }
}

fn search_roots(profile: Option<&str>) -> Result<Vec<PathBuf>> {
    let bases = profile_bases()?;

    if let Some(profile) = profile {
        if is_path_like(profile) {
            return Ok(vec![FileUtils::expand_path(profile)?]);
        }
        return Ok(bases.into_iter().map(|base| base.join(profile)).collect());
    }

    Ok(bases)
}

fn profile_bases() -> Result<Vec<PathBuf>> {
    let home = dirs::home_dir()
        .ok_or_else(|| BilimodError::Config("Cannot determine home directory".to_string()))?;

    #[cfg(target_os = "macos")]
    let bases = vec![home.join("Library/Application Support/Firefox/Profiles")];

    #[cfg(target_os = "windows")]
    let bases = vec![dirs::data_dir()
        .unwrap_or_else(|| home.join("AppData").join("Roaming"))
        .join("Mozilla")
        .join("Firefox")
        .join("Profiles")];

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let bases = vec![
        home.join(".mozilla/firefox"),
        home.join("snap/firefox/common/.mozilla/firefox"),
        home.join(".var/app/org.mozilla.firefox/.mozilla/firefox"),
    ];

    Ok(bases)
}

fn is_path_like(value: &str) -> bool {
    value.contains('/') || value.contains('\\') || value.starts_with('~')
}

fn find_cookie_dbs(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut results = Vec::new();
    for root in roots {
        if root.is_file() {
            if root.file_name().and_then(|n| n.to_str()) == Some("cookies.sqlite") {
                results.push(root.clone());
            }
            continue;
        }
        if root.is_dir() {
            results.extend(find_files(root, "cookies.sqlite"));
        }
    }
    results
}

fn find_files(root: &Path, filename: &str) -> Vec<PathBuf> {
    let mut matches = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().and_then(|name| name.to_str()) == Some(filename) {
                matches.push(path);
            }
        }
    }
    matches
}

fn newest_path(paths: Vec<PathBuf>) -> Option<PathBuf> {
    paths
        .into_iter()
        .filter_map(|path| {
            let modified = fs::metadata(&path).ok()?.modified().ok()?;
            Some((modified, path))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

fn read_schema_version(conn: &Connection) -> i64 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap_or(0)
}

struct CookieColumns {
    expiry: &'static str,
    secure: &'static str,
    http_only: &'static str,
}

fn cookie_columns(conn: &Connection) -> Result<CookieColumns> {
    let schema_error =
        |e: rusqlite::Error| BilimodError::BrowserCookie(format!("Failed to read cookie schema: {}", e));
    let mut stmt = conn
        .prepare("PRAGMA table_info(moz_cookies)")
        .map_err(schema_error)?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(schema_error)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(schema_error)?;
    let has = |name: &str| columns.iter().any(|c| c == name);

    let expiry = if has("expiry") {
        "expiry"
    } else if has("expires") {
        "expires"
    } else {
        return Err(BilimodError::BrowserCookie(
            "Firefox cookies table missing expiry column".to_string(),
        ));
    };
    let secure = if has("is_secure") { "is_secure" } else { "isSecure" };
    let http_only = if has("isHttpOnly") {
        "isHttpOnly"
    } else if has("is_http_only") {
        "is_http_only"
    } else {
        "0"
    };

    Ok(CookieColumns {
        expiry,
        secure,
        http_only,
    })
}

fn row_to_cookie(row: &Row<'_>, schema_version: i64) -> Result<Cookie> {
    let read_error =
        |field: &str, e: rusqlite::Error| BilimodError::BrowserCookie(format!("Failed to read cookie {}: {}", field, e));

    let domain: String = row.get(0).map_err(|e| read_error("host", e))?;
    let name: String = row.get(1).map_err(|e| read_error("name", e))?;
    let value: String = row.get(2).map_err(|e| read_error("value", e))?;
    let path: String = row.get(3).map_err(|e| read_error("path", e))?;
    let expiry: Option<i64> = row.get(4).map_err(|e| read_error("expiry", e))?;
    let secure: i64 = row.get(5).map_err(|e| read_error("secure flag", e))?;
    let http_only: i64 = row.get(6).map_err(|e| read_error("http-only flag", e))?;

    // Schema 16 switched expiry to milliseconds.
    let expires = expiry
        .map(|expiry| if schema_version >= 16 { expiry / 1000 } else { expiry })
        .filter(|seconds| *seconds > 0)
        .map(|seconds| seconds as f64);

    Ok(Cookie {
        name,
        value,
        domain,
        path,
        secure: secure != 0,
        http_only: http_only != 0,
        same_site: None,
        expires,
    })
}

enum Container {
    Any,
    NoneOnly,
    Specific(i64),
}

fn resolve_container(cookie_db: &Path, container: Option<&str>) -> Result<Container> {
    let container = match container {
        Some(container) => container,
        None => return Ok(Container::Any),
    };
    if container == "none" {
        return Ok(Container::NoneOnly);
    }

    let containers_path = cookie_db
        .parent()
        .map(|path| path.join("containers.json"))
        .ok_or_else(|| BilimodError::BrowserCookie("Firefox profile path not found".to_string()))?;
    if !containers_path.is_file() {
        return Err(BilimodError::FileNotFound(
            "Firefox containers.json not found".to_string(),
        ));
    }

    let data = fs::read_to_string(&containers_path)?;
    let value: Value = serde_json::from_str(&data)?;
    let identities = value
        .get("identities")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    identities
        .iter()
        .find_map(|identity| {
            let name = identity.get("name").and_then(|v| v.as_str());
            let l10n_id = identity.get("l10nID").and_then(|v| v.as_str());
            if name == Some(container) || l10n_matches(container, l10n_id) {
                identity.get("userContextId").and_then(|v| v.as_i64())
            } else {
                None
            }
        })
        .map(Container::Specific)
        .ok_or_else(|| {
            BilimodError::BrowserCookie(format!("Firefox container '{}' not found", container))
        })
}

fn l10n_matches(container: &str, l10n_id: Option<&str>) -> bool {
    l10n_id
        .and_then(|id| id.strip_prefix("userContext"))
        .and_then(|rest| rest.strip_suffix(".label"))
        .is_some_and(|label| label == container)
}
