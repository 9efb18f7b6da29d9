use crate::batch::BatchSummary;
use crate::error::BilimodError;

/// Exit status when a batch finished but at least one item failed.
pub const EXIT_ITEMS_FAILED: i32 = 1;

pub fn exit_code_for_error(err: &BilimodError) -> i32 {
    match err {
        BilimodError::InvalidUrl(_) => 3,
        BilimodError::Config(_) | BilimodError::InvalidUserId(_) => 2,
        BilimodError::Proxy(_) => 5,
        BilimodError::PermissionDenied(_) | BilimodError::FileNotFound(_) => 37,
        BilimodError::Io(_) => 23,
        BilimodError::Json(_) => 26,
        BilimodError::Http(err) => http_exit_code(err),
        BilimodError::BrowserCookie(_) | BilimodError::UnexpectedResponse(_) => 43,
        BilimodError::BatchInProgress => 16,
    }
}

/// Empty batches only produce a warning, so they exit cleanly.
pub fn exit_code_for_summary(summary: &BatchSummary) -> i32 {
    if summary.fail_count > 0 {
        EXIT_ITEMS_FAILED
    } else {
        0
    }
}

fn http_exit_code(err: &reqwest::Error) -> i32 {
    if err.is_timeout() {
        return 28;
    }
    if err.is_connect() {
        return 7;
    }
    if err.is_builder() {
        return 2;
    }
    43
}
