//! Output formatting and display utilities

use crate::batch::{BatchEvent, BatchItem, BatchObserver, BatchSummary, ItemStatus, Progress};
use crate::config::OutputConfig;
use crate::cookies::{Cookie, CookieStats};
use crate::error::{BilimodError, Result};
use crate::uid::UserId;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{self, Write};

const VALUE_PREVIEW_CHARS: usize = 30;

enum Sink {
    Stdout,
    File(File),
}

/// Output writer that handles file vs stdout
///
/// Results go to the sink; status lines and errors always go to stderr so
/// they never mix with machine-readable output.
pub struct OutputWriter {
    config: OutputConfig,
    sink: Sink,
}

impl OutputWriter {
    /// Open the configured sink. An output file is truncated once here and
    /// then written line by line.
    pub fn new(config: OutputConfig) -> Result<Self> {
        let sink = match &config.file {
            Some(path) => Sink::File(File::create(path)?),
            None => Sink::Stdout,
        };
        Ok(Self { config, sink })
    }

    pub fn json(&self) -> bool {
        self.config.json
    }

    /// Write content to configured output
    pub fn write(&mut self, content: &str) -> Result<()> {
        match &mut self.sink {
            Sink::File(file) => file.write_all(content.as_bytes())?,
            Sink::Stdout => io::stdout().write_all(content.as_bytes())?,
        }
        Ok(())
    }

    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.write(line)?;
        self.write("\n")
    }

    /// Write a status line (unless silenced)
    pub fn write_status(&self, message: &str) {
        if !self.config.silent {
            eprintln!("{}", message);
        }
    }

    pub fn write_warning(&self, message: &str) {
        if !self.config.silent {
            eprintln!("bilimod: warning: {}", message);
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        match &mut self.sink {
            Sink::File(file) => file.flush()?,
            Sink::Stdout => io::stdout().flush()?,
        }
        Ok(())
    }
}

/// Renders batch events as they happen.
///
/// In JSON mode every event becomes one JSON object per line on the sink.
/// Otherwise progress goes to stderr and item results plus the summary go to
/// the sink. The first write failure is kept and reported by [`finish`].
///
/// [`finish`]: BatchReporter::finish
pub struct BatchReporter<'a> {
    writer: &'a mut OutputWriter,
    failure: Option<BilimodError>,
}

impl<'a> BatchReporter<'a> {
    pub fn new(writer: &'a mut OutputWriter) -> Self {
        Self {
            writer,
            failure: None,
        }
    }

    pub fn finish(self) -> Result<()> {
        match self.failure {
            Some(err) => Err(err),
            None => self.writer.flush(),
        }
    }

    fn render(&mut self, event: &BatchEvent) -> Result<()> {
        if self.writer.json() {
            return self.writer.write_line(&event_json(event).to_string());
        }
        match event {
            BatchEvent::Warning(message) => self.writer.write_warning(message),
            BatchEvent::Started { action, total } => self
                .writer
                .write_status(&format!("{} {} users...", capitalize(action.progressive()), total)),
            BatchEvent::Progress(progress) => self.writer.write_status(&progress_line(progress)),
            BatchEvent::ItemFinished { item, .. } => self.writer.write_line(&item_line(item))?,
            BatchEvent::Finished(summary) => self.writer.write_line(&summary_line(summary))?,
        }
        Ok(())
    }
}

impl BatchObserver for BatchReporter<'_> {
    fn on_event(&mut self, event: &BatchEvent) {
        if self.failure.is_some() {
            return;
        }
        if let Err(err) = self.render(event) {
            log::error!("Failed to write batch output: {}", err);
            self.failure = Some(err);
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub(crate) fn progress_line(progress: &Progress) -> String {
    format!(
        "[{}/{} {:>3}%] {} (ok {}, failed {})",
        progress.processed,
        progress.total,
        progress.percentage,
        progress.current,
        progress.success_count,
        progress.fail_count
    )
}

pub(crate) fn item_line(item: &BatchItem) -> String {
    let label = match item.status {
        ItemStatus::Succeeded => "ok",
        ItemStatus::Failed => "FAILED",
        ItemStatus::Pending => "pending",
        ItemStatus::InProgress => "running",
    };
    let message = item.outcome.as_ref().map(|o| o.message.as_str()).unwrap_or("");
    format!("{:<7} {:<12} {}", label, item.id, message).trim_end().to_string()
}

pub(crate) fn summary_line(summary: &BatchSummary) -> String {
    format!(
        "{} finished: {} succeeded, {} failed, {} total",
        summary.action,
        summary.success_count,
        summary.fail_count,
        summary.total()
    )
}

pub(crate) fn event_json(event: &BatchEvent) -> Value {
    match event {
        BatchEvent::Warning(message) => json!({ "event": "warning", "message": message }),
        BatchEvent::Started { action, total } => {
            json!({ "event": "started", "action": action, "total": total })
        }
        BatchEvent::Progress(progress) => tagged("progress", progress),
        BatchEvent::ItemFinished {
            index,
            item,
            success_count,
            fail_count,
        } => {
            let mut value = tagged("item", item);
            if let Value::Object(map) = &mut value {
                map.insert("index".to_string(), json!(index));
                map.insert("successCount".to_string(), json!(success_count));
                map.insert("failCount".to_string(), json!(fail_count));
            }
            value
        }
        BatchEvent::Finished(summary) => {
            json!({
                "event": "summary",
                "action": summary.action,
                "successCount": summary.success_count,
                "failCount": summary.fail_count,
                "total": summary.total(),
            })
        }
    }
}

fn tagged<T: serde::Serialize>(event: &str, payload: &T) -> Value {
    let mut value = serde_json::to_value(payload).unwrap_or(Value::Null);
    match &mut value {
        Value::Object(map) => {
            map.insert("event".to_string(), json!(event));
            value
        }
        _ => json!({ "event": event, "data": value }),
    }
}

/// Extracted ids, one per line, or a JSON array.
pub fn render_ids(ids: &[UserId], as_json: bool) -> String {
    if as_json {
        return format!("{}\n", json!(ids));
    }
    ids.iter().map(|id| format!("{}\n", id)).collect()
}

/// Cookie listing in columns with a statistics footer.
pub fn render_cookie_table(cookies: &[&Cookie], stats: &CookieStats) -> String {
    let mut out = String::new();
    if cookies.is_empty() {
        out.push_str("No cookies found; sign in to Bilibili in the browser first\n");
    } else {
        out.push_str(&format!(
            "{:<28} {:<34} {:<20} {:<6} {:<8} {:<6} {}\n",
            "NAME", "VALUE", "DOMAIN", "PATH", "HTTPONLY", "SECURE", "SAMESITE"
        ));
        for cookie in cookies {
            out.push_str(&format!(
                "{:<28} {:<34} {:<20} {:<6} {:<8} {:<6} {}\n",
                cookie.name,
                preview_value(&cookie.value),
                cookie.domain,
                cookie.path,
                yes_no(cookie.http_only),
                yes_no(cookie.secure),
                cookie.same_site.as_deref().unwrap_or("no_restriction")
            ));
        }
    }
    out.push_str(&format!(
        "{} cookies ({} httpOnly, {} secure, {} hidden)\n",
        stats.total, stats.http_only, stats.secure, stats.filtered
    ));
    out
}

/// `name=value; ...` as sent in a `Cookie` header.
pub fn render_cookie_header(cookies: &[&Cookie]) -> String {
    let header = cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ");
    format!("{}\n", header)
}

/// Pretty JSON array in the browser export shape.
pub fn render_cookie_json(cookies: &[&Cookie]) -> Result<String> {
    Ok(format!("{}\n", serde_json::to_string_pretty(cookies)?))
}

fn preview_value(value: &str) -> String {
    if value.chars().count() > VALUE_PREVIEW_CHARS {
        let head: String = value.chars().take(VALUE_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        value.to_string()
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
