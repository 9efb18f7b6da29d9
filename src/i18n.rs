use crate::error::BilimodError;
use fluent_templates::fluent_bundle::FluentValue;
use fluent_templates::{static_loader, Loader};
use std::borrow::Cow;
use std::collections::HashMap;
use unic_langid::LanguageIdentifier;

static_loader! {
    static LOCALES = {
        locales: "./locales",
        fallback_language: "en-US",
        customise: |bundle| bundle.set_use_isolating(false),
    };
}

pub fn localize_error(err: &BilimodError) -> String {
    localize_error_in(&resolve_language(), err)
}

pub(crate) fn localize_error_in(langid: &LanguageIdentifier, err: &BilimodError) -> String {
    match err {
        BilimodError::Http(detail) => message_with_detail(langid, "error-http", detail.to_string()),
        BilimodError::BrowserCookie(detail) => {
            message_with_detail(langid, "error-browser-cookie", detail.clone())
        }
        BilimodError::InvalidUrl(detail) => {
            message_with_detail(langid, "error-invalid-url", detail.clone())
        }
        BilimodError::InvalidUserId(detail) => {
            message_with_detail(langid, "error-invalid-user-id", detail.clone())
        }
        BilimodError::Io(detail) => message_with_detail(langid, "error-io", detail.to_string()),
        BilimodError::Json(detail) => message_with_detail(langid, "error-json", detail.to_string()),
        BilimodError::UnexpectedResponse(detail) => {
            message_with_detail(langid, "error-unexpected-response", detail.clone())
        }
        BilimodError::Proxy(detail) => message_with_detail(langid, "error-proxy", detail.clone()),
        BilimodError::Config(detail) => message_with_detail(langid, "error-config", detail.clone()),
        BilimodError::PermissionDenied(detail) => {
            message_with_detail(langid, "error-permission-denied", detail.clone())
        }
        BilimodError::FileNotFound(detail) => {
            message_with_detail(langid, "error-file-not-found", detail.clone())
        }
        BilimodError::BatchInProgress => LOCALES.lookup(langid, "error-batch-in-progress"),
    }
}

fn message_with_detail(langid: &LanguageIdentifier, key: &str, detail: String) -> String {
    let mut args: HashMap<Cow<'static, str>, FluentValue> = HashMap::new();
    args.insert(Cow::Borrowed("detail"), FluentValue::from(detail));
    LOCALES.lookup_with_args(langid, key, &args)
}

fn resolve_language() -> LanguageIdentifier {
    for key in ["LC_ALL", "LC_MESSAGES", "LANG"] {
        if let Ok(value) = std::env::var(key) {
            if let Some(lang) = normalize_lang(&value) {
                if let Ok(langid) = lang.parse::<LanguageIdentifier>() {
                    return langid;
                }
            }
        }
    }
    unic_langid::langid!("en-US")
}

fn normalize_lang(value: &str) -> Option<String> {
    let value = value.trim();
    let value = value.split(['.', '@']).next().unwrap_or(value);
    if value.is_empty() || value == "C" || value == "POSIX" {
        return None;
    }
    Some(value.replace('_', "-"))
}
