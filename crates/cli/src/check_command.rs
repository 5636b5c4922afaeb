//! `switchboard check`: config validation and route listing.
//!
//! Prints a report with `[ok]`, `[warn]`, `[fail]` or `[info]` per item and
//! exits non-zero when anything failed.

use std::path::Path;

use {
    anyhow::Result,
    switchboard_config::{
        SwitchboardConfig,
        validate::{self, Severity, ValidationResult},
    },
    switchboard_media::Downloader,
    switchboard_pipeline::Router,
};

use crate::{app, run_command};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    Warn,
    Fail,
    Info,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Info => "info",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Ok => GREEN,
            Self::Warn => YELLOW,
            Self::Fail => RED,
            Self::Info => CYAN,
        }
    }
}

impl From<Severity> for Status {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Error => Self::Fail,
            Severity::Warning => Self::Warn,
            Severity::Info => Self::Info,
        }
    }
}

struct Section {
    title: String,
    items: Vec<(Status, String)>,
}

impl Section {
    fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            items: Vec::new(),
        }
    }

    fn push(&mut self, status: Status, message: impl Into<String>) {
        self.items.push((status, message.into()));
    }
}

fn print_report(sections: &[Section]) -> (usize, usize) {
    let mut errors = 0usize;
    let mut warnings = 0usize;

    for section in sections {
        eprintln!("{BOLD}{}{RESET}", section.title);
        for (status, message) in &section.items {
            eprintln!("  [{}{}{RESET}]  {message}", status.color(), status.label());
            match status {
                Status::Fail => errors += 1,
                Status::Warn => warnings += 1,
                _ => {},
            }
        }
        eprintln!();
    }

    (errors, warnings)
}

pub async fn handle_check(config_path: Option<&Path>) -> Result<()> {
    let validation = validate::validate(config_path);
    let mut sections = vec![check_config(&validation)];

    if !validation.has_errors() {
        let (config, _) = run_command::load(config_path)?;
        let router = app::build_router(&config, None)?;
        sections.push(check_routes(&config, &router));
        sections.push(check_runtime(&config).await);
    }

    let (errors, warnings) = print_report(&sections);
    eprintln!("{BOLD}Summary:{RESET} {errors} error(s), {warnings} warning(s)");

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn check_config(result: &ValidationResult) -> Section {
    let label = result
        .config_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".into());
    let mut section = Section::new(format!("Config ({label})"));

    if result.diagnostics.is_empty() {
        section.push(Status::Ok, "no problems found");
    }
    for d in &result.diagnostics {
        let message = if d.path.is_empty() {
            d.message.clone()
        } else {
            format!("{}: {}", d.path, d.message)
        };
        section.push(d.severity.into(), message);
    }
    section
}

fn check_routes(config: &SwitchboardConfig, router: &Router) -> Section {
    let mut section = Section::new(format!("Commands (prefix \"{}\")", config.command_prefix));
    for (word, slug) in &config.commands {
        if router.has_route(slug) {
            section.push(Status::Ok, format!("{word} → {slug}"));
        } else {
            section.push(Status::Fail, format!("{word} → {slug} (no such route)"));
        }
    }
    let routed: Vec<&str> = config.commands.values().map(String::as_str).collect();
    for slug in router.routes() {
        if !routed.contains(&slug.as_str()) {
            section.push(Status::Info, format!("route {slug} has no command"));
        }
    }
    section
}

async fn check_runtime(config: &SwitchboardConfig) -> Section {
    let mut section = Section::new("Runtime");

    if config.telegram.has_token() {
        section.push(Status::Ok, "telegram token set");
    } else {
        section.push(
            Status::Fail,
            "telegram token missing (telegram.token or TELEGRAM_BOT_TOKEN)",
        );
    }

    match Downloader::locate(config.media.ytdlp_path.as_deref()) {
        Ok(downloader) => match downloader.version().await {
            Ok(version) => section.push(
                Status::Ok,
                format!("yt-dlp {version} ({})", downloader.program().display()),
            ),
            Err(e) => section.push(Status::Warn, format!("yt-dlp not runnable: {e}")),
        },
        Err(e) => section.push(Status::Warn, format!("yt-dlp unavailable: {e}")),
    }

    section.push(
        Status::Info,
        format!(
            "media: {} into {}",
            config.media.kind,
            config.media.output_dir.display()
        ),
    );
    section
}
