//! Config schema types (commands, telegram, flow control, media).

use std::{collections::BTreeMap, fmt, path::PathBuf};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    switchboard_flow::{
        DelayTier, FlowPolicy,
        policy::{DEFAULT_DROP_THRESHOLD, default_tiers},
        tracker::DEFAULT_MAX_IDENTITIES,
    },
    switchboard_media::MediaKind,
    switchboard_pipeline::DEFAULT_COMMAND_PREFIX,
};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Text prefix that marks a message as a command. Empty disables commands.
    pub command_prefix: String,
    /// Username patterns granted admin. Exact names or `*` globs.
    pub admins: Vec<String>,
    /// Command word (e.g. `.dl`) to route slug (e.g. `v1.download_stream_video`).
    pub commands: BTreeMap<String, String>,
    pub telegram: TelegramConfig,
    pub flow: FlowConfig,
    pub media: MediaConfig,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            command_prefix: DEFAULT_COMMAND_PREFIX.into(),
            admins: Vec::new(),
            commands: BTreeMap::from([(".dl".into(), "v1.download_stream_video".into())]),
            telegram: TelegramConfig::default(),
            flow: FlowConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

/// Telegram bot settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,
    /// Long-polling timeout passed to `getUpdates`.
    pub poll_timeout_secs: u32,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
            poll_timeout_secs: 30,
        }
    }
}

impl TelegramConfig {
    pub fn has_token(&self) -> bool {
        !self.token.expose_secret().trim().is_empty()
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"[REDACTED]")
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

/// Adaptive flow control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Error rate above which messages are dropped.
    pub drop_threshold: f64,
    /// Delay ladder, strictly descending by rate, ending with rate 0.
    pub tiers: Vec<DelayTier>,
    /// Identities tracked before the least recently seen is forgotten.
    pub max_identities: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            drop_threshold: DEFAULT_DROP_THRESHOLD,
            tiers: default_tiers(),
            max_identities: DEFAULT_MAX_IDENTITIES,
        }
    }
}

impl FlowConfig {
    pub fn policy(&self) -> switchboard_flow::Result<FlowPolicy> {
        FlowPolicy::new(self.drop_threshold, self.tiers.clone())
    }
}

/// Media download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Directory downloads are written to.
    pub output_dir: PathBuf,
    pub kind: MediaKind,
    /// Explicit `yt-dlp` binary; searched on `PATH` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ytdlp_path: Option<PathBuf>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            output_dir: std::env::temp_dir().join("switchboard-downloads"),
            kind: MediaKind::default(),
            ytdlp_path: None,
        }
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_route_download_command() {
        let cfg = SwitchboardConfig::default();
        assert_eq!(cfg.command_prefix, ".");
        assert_eq!(
            cfg.commands.get(".dl").map(String::as_str),
            Some("v1.download_stream_video")
        );
        assert!(!cfg.telegram.has_token());
        assert_eq!(cfg.flow.policy().unwrap(), FlowPolicy::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: SwitchboardConfig = toml::from_str(
            r#"
            admins = ["alice", "ops_*"]

            [telegram]
            token = "123:abc"

            [flow]
            drop_threshold = 0.5
            tiers = [{ rate = 0.3, delay_ms = 5000 }, { rate = 0.0, delay_ms = 100 }]

            [media]
            kind = "video"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.admins, vec!["alice", "ops_*"]);
        assert!(cfg.telegram.has_token());
        assert_eq!(cfg.telegram.poll_timeout_secs, 30);
        assert_eq!(cfg.flow.tiers[0], DelayTier::new(0.3, 5_000));
        assert_eq!(cfg.flow.max_identities, DEFAULT_MAX_IDENTITIES);
        assert_eq!(cfg.media.kind, MediaKind::Video);
        assert!(cfg.commands.contains_key(".dl"));
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = TelegramConfig {
            token: Secret::new("123:secret".into()),
            ..Default::default()
        };
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn serializes_token_for_round_trip_to_disk() {
        let mut cfg = SwitchboardConfig::default();
        cfg.telegram.token = Secret::new("123:abc".into());
        let raw = toml::to_string(&cfg).unwrap();
        assert!(raw.contains("token = \"123:abc\""));
    }
}
