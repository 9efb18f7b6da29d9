//! CLI argument parsing module
//!
//! This module handles command-line argument parsing and application entry point.

use crate::action::ActionKind;
use crate::batch::BatchOrchestrator;
use crate::config::{BrowserCookieConfig, Config, CookieSource, ProxyConfig};
use crate::cookies::CookieJar;
use crate::error::{BilimodError, Result};
use crate::executor::ActionExecutor;
use crate::exit_code::{exit_code_for_error, exit_code_for_summary};
use crate::output::{self, BatchReporter, OutputWriter};
use crate::relay::{CookieSourceLoader, ExecutionRelay, SessionHost};
use crate::uid::{dedup_ids, extract_uids, UserId};
use crate::utils::{FileUtils, StringUtils, UrlUtils};
use crate::{i18n, logging};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::sync::Arc;

/// Main entry point for the CLI application
pub fn run() {
    let matches = create_app().get_matches();
    logging::init(matches.get_count("verbose"));
    let silent = matches.get_flag("silent");

    let code = match run_with_args(&matches) {
        Ok(code) => code,
        Err(e) => {
            if !silent {
                eprintln!("bilimod: error: {}", i18n::localize_error(&e));
            }
            exit_code_for_error(&e)
        }
    };
    std::process::exit(code);
}

/// Run a subcommand; returns the process exit code.
fn run_with_args(matches: &ArgMatches) -> Result<i32> {
    let config = build_config_from_args(matches)?;

    match matches.subcommand() {
        Some(("parse", sub)) => run_parse(sub, config),
        Some(("block", sub)) => run_batch(sub, config, ActionKind::Block),
        Some(("unblock", sub)) => run_batch(sub, config, ActionKind::Unblock),
        Some(("cookies", sub)) => run_cookies(sub, config),
        _ => Err(BilimodError::Config("No subcommand given".to_string())),
    }
}

fn run_parse(matches: &ArgMatches, config: Config) -> Result<i32> {
    let text = collect_text(matches)?;
    let ids = extract_uids(&text);

    let mut writer = OutputWriter::new(config.output.clone())?;
    if ids.is_empty() {
        writer.write_warning("no user ids found; expected links like https://space.bilibili.com/<uid>");
    } else {
        writer.write_status(&format!("Found {} user ids", ids.len()));
    }
    writer.write(&output::render_ids(&ids, config.output.json))?;
    writer.flush()?;
    Ok(0)
}

fn run_batch(matches: &ArgMatches, config: Config, action: ActionKind) -> Result<i32> {
    let ids = collect_ids(matches)?;

    let source = match (&config.cookies, ids.is_empty()) {
        (Some(source), _) => source.clone(),
        // Never loaded: an empty batch dispatches nothing.
        (None, true) => CookieSource::Header(String::new()),
        (None, false) => {
            return Err(BilimodError::Config(
                "No session cookies; use --cookies, --cookie-file or --cookies-from-browser"
                    .to_string(),
            ))
        }
    };

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| BilimodError::Config(format!("Failed to create async runtime: {}", e)))?;

    rt.block_on(async {
        let executor = Arc::new(ActionExecutor::new(&config)?);
        let loader = Arc::new(CookieSourceLoader::new(source, config.site_domain.clone()));
        let host = Arc::new(SessionHost::new(loader, executor));
        let relay = Arc::new(ExecutionRelay::new(host, &config)?);
        let orchestrator = BatchOrchestrator::new(relay, config.pacing);

        let mut writer = OutputWriter::new(config.output.clone())?;
        let mut reporter = BatchReporter::new(&mut writer);
        let summary = orchestrator.run(ids, action, &mut reporter).await?;
        reporter.finish()?;
        Ok(exit_code_for_summary(&summary))
    })
}

fn run_cookies(matches: &ArgMatches, config: Config) -> Result<i32> {
    let source = config.cookies.clone().ok_or_else(|| {
        BilimodError::Config(
            "No cookie source; use --cookies, --cookie-file or --cookies-from-browser".to_string(),
        )
    })?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| BilimodError::Config(format!("Failed to create async runtime: {}", e)))?;
    let jar = rt.block_on(CookieJar::load(&source, &config.site_domain))?;

    let (visible, stats) = jar.visible();
    let rendered = if matches.get_flag("header") {
        output::render_cookie_header(&visible)
    } else if config.output.json {
        output::render_cookie_json(&visible)?
    } else {
        output::render_cookie_table(&visible, &stats)
    };

    let mut writer = OutputWriter::new(config.output.clone())?;
    writer.write(&rendered)?;
    writer.flush()?;
    Ok(0)
}

/// Positional text and every `--file` input, joined by newlines.
fn collect_text(matches: &ArgMatches) -> Result<String> {
    let mut parts: Vec<String> = matches
        .get_many::<String>("text")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    if let Some(files) = matches.get_many::<String>("file") {
        for file in files {
            parts.push(FileUtils::read_text(file)?);
        }
    }
    Ok(parts.join("\n"))
}

/// Raw `--uid` values first, then ids found in the text, first seen wins.
fn collect_ids(matches: &ArgMatches) -> Result<Vec<UserId>> {
    let mut ids = Vec::new();
    if let Some(raw) = matches.get_many::<String>("uid") {
        for value in raw {
            ids.push(UserId::parse(value)?);
        }
    }
    ids.extend(extract_uids(&collect_text(matches)?));
    Ok(dedup_ids(ids))
}

fn text_args(command: Command) -> Command {
    command
        .arg(Arg::new("text")
            .help("Text containing profile links (https://space.bilibili.com/<uid>)")
            .num_args(0..)
            .index(1))
        .arg(Arg::new("file")
            .short('f')
            .long("file")
            .value_name("FILE")
            .help("Read text from FILE ('-' for stdin)")
            .action(ArgAction::Append))
}

fn batch_command(name: &'static str, about: &'static str) -> Command {
    text_args(Command::new(name).about(about))
        .arg(Arg::new("uid")
            .long("uid")
            .value_name("UID")
            .help("Numeric user id, may be repeated")
            .action(ArgAction::Append))
}

/// Create the CLI application structure
pub fn create_app() -> Command {
    Command::new("bilimod")
        .version(crate::VERSION)
        .about("Batch block/unblock Bilibili users with your browser session")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(text_args(
            Command::new("parse").about("Extract user ids from pasted text"),
        ))
        .subcommand(batch_command("block", "Block every user found in the input"))
        .subcommand(batch_command("unblock", "Unblock every user found in the input"))
        .subcommand(Command::new("cookies")
            .about("List the session cookies for the site")
            .arg(Arg::new("header")
                .long("header")
                .help("Print a single Cookie header line")
                .action(ArgAction::SetTrue)))
        .arg(Arg::new("cookies")
            .short('b')
            .long("cookies")
            .value_name("NAME=VALUE; ...")
            .help("Session cookies as a Cookie header string")
            .env("BILIMOD_COOKIES")
            .hide_env_values(true)
            .global(true))
        .arg(Arg::new("cookie-file")
            .long("cookie-file")
            .value_name("FILE")
            .help("JSON cookie export to read the session from")
            .global(true))
        .arg(Arg::new("cookies-from-browser")
            .long("cookies-from-browser")
            .value_name("BROWSER[:PROFILE][::CONTAINER]")
            .help("Read the session from a browser profile (firefox)")
            .global(true))
        .arg(Arg::new("api-base")
            .long("api-base")
            .value_name("URL")
            .help("Base URL of the relation API")
            .env("BILIMOD_API_BASE")
            .global(true))
        .arg(Arg::new("site-url")
            .long("site-url")
            .value_name("URL")
            .help("Site the session context is opened on")
            .global(true))
        .arg(Arg::new("timeout")
            .long("timeout")
            .value_name("DURATION")
            .help("Maximum time for one request (e.g. 30, 30s, 2m)")
            .global(true))
        .arg(Arg::new("connect-timeout")
            .long("connect-timeout")
            .value_name("DURATION")
            .help("Maximum time for connection")
            .global(true))
        .arg(Arg::new("user-agent")
            .short('A')
            .long("user-agent")
            .value_name("STRING")
            .help("User-Agent header")
            .global(true))
        .arg(Arg::new("proxy")
            .short('x')
            .long("proxy")
            .value_name("[PROTOCOL://]HOST[:PORT]")
            .help("Use proxy server")
            .global(true))
        .arg(Arg::new("proxy-user")
            .short('U')
            .long("proxy-user")
            .value_name("USER:PASSWORD")
            .help("Proxy credentials")
            .global(true))
        .arg(Arg::new("json")
            .long("json")
            .help("Machine-readable JSON output")
            .action(ArgAction::SetTrue)
            .global(true))
        .arg(Arg::new("output")
            .short('o')
            .long("output")
            .value_name("FILE")
            .help("Write output to file")
            .global(true))
        .arg(Arg::new("silent")
            .short('s')
            .long("silent")
            .help("Silent mode")
            .action(ArgAction::SetTrue)
            .global(true))
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .help("More logging, repeat for debug")
            .action(ArgAction::Count)
            .global(true))
}

/// Build configuration from command line arguments
pub fn build_config_from_args(matches: &ArgMatches) -> Result<Config> {
    let mut config = Config::default();

    // Cookie source: browser, then file, then header string
    if let Some(browser_str) = matches.get_one::<String>("cookies-from-browser") {
        config.cookies = Some(CookieSource::Browser(BrowserCookieConfig::parse(browser_str)?));
    } else if let Some(file) = matches.get_one::<String>("cookie-file") {
        config.cookies = Some(CookieSource::JsonFile(FileUtils::expand_path(file)?));
    } else if let Some(header) = matches.get_one::<String>("cookies") {
        if !header.trim().is_empty() {
            config.cookies = Some(CookieSource::Header(header.clone()));
        }
    }

    if let Some(api_base) = matches.get_one::<String>("api-base") {
        config.api_base = UrlUtils::validate_url(api_base)?.to_string();
    }

    if let Some(site_url) = matches.get_one::<String>("site-url") {
        let url = UrlUtils::validate_url(site_url)?;
        if let Some(domain) = UrlUtils::site_domain(&url) {
            config.site_domain = domain;
        }
        config.site_url = url.to_string();
    }

    if let Some(timeout_str) = matches.get_one::<String>("timeout") {
        config.timeout = StringUtils::parse_timeout(timeout_str)?;
    }

    if let Some(connect_timeout_str) = matches.get_one::<String>("connect-timeout") {
        config.connect_timeout = StringUtils::parse_timeout(connect_timeout_str)?;
    }

    if let Some(user_agent) = matches.get_one::<String>("user-agent") {
        config.user_agent = Some(user_agent.clone());
    }

    if let Some(proxy_url) = matches.get_one::<String>("proxy") {
        let (username, password) = match matches.get_one::<String>("proxy-user") {
            Some(creds) => {
                let (user, password) = StringUtils::parse_credentials(creds)?;
                (Some(user), Some(password))
            }
            None => (None, None),
        };
        config.proxy = Some(ProxyConfig {
            url: proxy_url.clone(),
            username,
            password,
        });
    }

    config.output.json = matches.get_flag("json");
    config.output.silent = matches.get_flag("silent");
    if let Some(output_file) = matches.get_one::<String>("output") {
        config.output.file = Some(FileUtils::expand_path(output_file)?);
    }

    Ok(config)
}
