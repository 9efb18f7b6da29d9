//! User id parsing and extraction from pasted text.

use crate::error::{BilimodError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

static PROFILE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"space\.bilibili\.com/(\d+)").expect("profile URL pattern is valid")
});

/// A Bilibili user id (mid). Kept as text so long ids never lose precision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Normalize a raw id: surrounding whitespace is dropped and the rest
    /// must be one or more ASCII digits.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BilimodError::InvalidUserId(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric form used in `extend_content`; `None` when it overflows `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        self.0.parse().ok()
    }

    /// Profile page of this user.
    pub fn space_url(&self) -> String {
        format!("https://space.bilibili.com/{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = BilimodError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Extract every `space.bilibili.com/<digits>` id from `text`, first-seen
/// order, duplicates dropped.
pub fn extract_uids(text: &str) -> Vec<UserId> {
    dedup_ids(
        PROFILE_URL
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| UserId(m.as_str().to_string())),
    )
}

/// Drop repeated ids while keeping the first occurrence of each.
pub fn dedup_ids<I>(ids: I) -> Vec<UserId>
where
    I: IntoIterator<Item = UserId>,
{
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
