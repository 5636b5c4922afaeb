//! Configuration validation.
//!
//! Reports syntax errors, unknown or misspelled fields, type errors and
//! semantic problems (bad route slugs, malformed delay ladders, a missing bot
//! token) as a flat list of diagnostics.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use switchboard_pipeline::Slug;

use crate::{loader, schema::SwitchboardConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "commands",
    /// "flow", "telegram", "admins", "media"
    pub category: &'static str,
    /// Dotted path, e.g. "flow.tiers"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}] {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Known-field tree ────────────────────────────────────────────────────────

enum Shape {
    Struct(HashMap<&'static str, Shape>),
    /// Dynamic keys, e.g. the command table.
    Map,
    Array(Box<Shape>),
    Leaf,
}

fn schema_shape() -> Shape {
    use Shape::{Array, Leaf, Map, Struct};

    Struct(HashMap::from([
        ("command_prefix", Leaf),
        ("admins", Leaf),
        ("commands", Map),
        (
            "telegram",
            Struct(HashMap::from([("token", Leaf), ("poll_timeout_secs", Leaf)])),
        ),
        (
            "flow",
            Struct(HashMap::from([
                ("drop_threshold", Leaf),
                (
                    "tiers",
                    Array(Box::new(Struct(HashMap::from([
                        ("rate", Leaf),
                        ("delay_ms", Leaf),
                    ])))),
                ),
                ("max_identities", Leaf),
            ])),
        ),
        (
            "media",
            Struct(HashMap::from([
                ("output_dir", Leaf),
                ("kind", Leaf),
                ("ytdlp_path", Leaf),
            ])),
        ),
    ]))
}

fn check_unknown_fields(
    value: &serde_json::Value,
    shape: &Shape,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (value, shape) {
        (serde_json::Value::Object(table), Shape::Struct(fields)) => {
            let known: Vec<&str> = fields.keys().copied().collect();
            for (key, child) in table {
                let path = join_path(prefix, key);
                match fields.get(key.as_str()) {
                    Some(child_shape) => {
                        check_unknown_fields(child, child_shape, &path, diagnostics);
                    },
                    None => {
                        let message = match closest(key, &known, 3) {
                            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                            None => "unknown field".to_string(),
                        };
                        diagnostics.push(Diagnostic::new(
                            Severity::Error,
                            "unknown-field",
                            path,
                            message,
                        ));
                    },
                }
            }
        },
        (serde_json::Value::Array(items), Shape::Array(item_shape)) => {
            for (i, item) in items.iter().enumerate() {
                check_unknown_fields(item, item_shape, &format!("{prefix}[{i}]"), diagnostics);
            }
        },
        // Dynamic maps, leaves and type mismatches stop here; the typed
        // parse reports the latter.
        _ => {},
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Edit distance between two ASCII-ish identifiers.
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diag = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diag
            } else {
                1 + diag.min(above).min(row[j])
            };
            diag = above;
        }
    }
    row[b.len()]
}

fn closest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (edit_distance(needle, c), *c))
        .filter(|(d, _)| *d <= max_distance)
        .min()
        .map(|(_, c)| c)
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Validate the file at `path`, or the discovered config when `None`.
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => loader::find_config_file(),
    };
    let Some(path) = path else {
        let mut result = validate_config(&SwitchboardConfig::default());
        result.diagnostics.insert(
            0,
            Diagnostic::new(
                Severity::Info,
                "file",
                "",
                "no config file found, checking defaults",
            ),
        );
        return result;
    };

    let mut result = match std::fs::read_to_string(&path) {
        Ok(raw) => {
            let raw = crate::env_subst::substitute_env(&raw);
            let format = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
            validate_str(&raw, format)
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "file",
                "",
                format!("failed to read {}: {e}", path.display()),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(path);
    result
}

/// Validate raw config text in the given format (`toml`, `yaml`, `yml`, `json`).
pub fn validate_str(raw: &str, format: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax
    let parsed: Result<serde_json::Value, String> = match format {
        "toml" => toml::from_str::<toml::Value>(raw)
            .map_err(|e| e.to_string())
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str::<serde_json::Value>(raw).map_err(|e| e.to_string()),
        "json" => serde_json::from_str::<serde_json::Value>(raw).map_err(|e| e.to_string()),
        other => Err(format!("unsupported config format: .{other}")),
    };
    let value = match parsed {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    check_unknown_fields(&value, &schema_shape(), "", &mut diagnostics);

    // 3. Types, then 4. semantics on the typed config
    match serde_json::from_value::<SwitchboardConfig>(value) {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Semantic checks on an already-typed config.
pub fn validate_config(config: &SwitchboardConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    check_semantics(config, &mut diagnostics);
    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_semantics(config: &SwitchboardConfig, diagnostics: &mut Vec<Diagnostic>) {
    if config.command_prefix.is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "commands",
            "command_prefix",
            "empty prefix: no message will be treated as a command",
        ));
    }

    if config.commands.is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "commands",
            "commands",
            "no commands configured: every message will be forwarded unrouted",
        ));
    }
    for (word, slug) in &config.commands {
        let path = format!("commands.\"{word}\"");
        if word.is_empty() || word.contains(char::is_whitespace) {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "commands",
                path.clone(),
                "command word must be a single non-empty word",
            ));
        } else if !config.command_prefix.is_empty() && !word.starts_with(&config.command_prefix) {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "commands",
                path.clone(),
                format!(
                    "command word does not start with prefix \"{}\"",
                    config.command_prefix
                ),
            ));
        }
        if let Err(e) = Slug::parse(slug) {
            diagnostics.push(Diagnostic::new(Severity::Error, "commands", path, e.to_string()));
        }
    }

    if let Err(e) = config.flow.policy() {
        diagnostics.push(Diagnostic::new(Severity::Error, "flow", "flow", e.to_string()));
    }
    if config.flow.max_identities == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "flow",
            "flow.max_identities",
            "must track at least one identity",
        ));
    }

    if !config.telegram.has_token() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "telegram",
            "telegram.token",
            "bot token is empty; set it here or via TELEGRAM_BOT_TOKEN",
        ));
    }
    if config.telegram.poll_timeout_secs == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Info,
            "telegram",
            "telegram.poll_timeout_secs",
            "0 disables long polling and busy-loops getUpdates",
        ));
    }

    for (i, pattern) in config.admins.iter().enumerate() {
        if pattern.trim().is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "admins",
                format!("admins[{i}]"),
                "empty admin pattern never matches",
            ));
        }
    }

    if let Some(path) = &config.media.ytdlp_path
        && !path.exists()
    {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "media",
            "media.ytdlp_path",
            format!("{} does not exist", path.display()),
        ));
    }
}
