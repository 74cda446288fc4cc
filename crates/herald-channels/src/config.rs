//! Configuration for the Herald bot.
//!
//! Built once at startup from `HERALD_*` environment variables (a `.env` file
//! is loaded into the environment first by the binary) and passed by value to
//! whatever needs it. The unprefixed `BOT_TOKEN`, `CHANNEL_ID` and `GROUP_ID`
//! are accepted when the prefixed name is unset. `HeraldConfig::from_env()` returns `Err` when
//! the bot token is missing or a chat id is missing or not numeric; the
//! process should not start in that case.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use herald_core::{DeliveryPolicy, DEFAULT_DISPATCH_INTERVAL};

pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

/// Older unprefixed names, read only when the `HERALD_` key is unset.
const LEGACY_KEYS: [(&str, &str); 3] = [
    ("HERALD_BOT_TOKEN", "BOT_TOKEN"),
    ("HERALD_CHANNEL_ID", "CHANNEL_ID"),
    ("HERALD_GROUP_ID", "GROUP_ID"),
];

fn legacy_key(key: &str) -> Option<&'static str> {
    LEGACY_KEYS
        .iter()
        .find(|(current, _)| *current == key)
        .map(|(_, legacy)| *legacy)
}

#[derive(Debug, Clone)]
pub struct HeraldConfig {
    pub telegram: TelegramConfig,
    /// Broadcast channel that scheduled posts are published to.
    pub channel_id: i64,
    /// Discussion group whose plain messages are answered from the FAQ.
    pub group_id: i64,
    /// Directory holding `scheduled_posts.json`, `faqs.json` and `logs/`.
    pub state_dir: PathBuf,
    pub dispatch_interval: Duration,
    pub delivery_policy: DeliveryPolicy,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Bot API base URL, without the `/bot<token>` suffix.
    pub api_base: String,
}

impl HeraldConfig {
    /// Build from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let with_legacy =
            |key: &str| non_empty(key).or_else(|| legacy_key(key).and_then(&non_empty));

        let Some(bot_token) = with_legacy("HERALD_BOT_TOKEN") else {
            bail!("HERALD_BOT_TOKEN is not set");
        };
        let channel_id = required_chat_id(&with_legacy, "HERALD_CHANNEL_ID")?;
        let group_id = required_chat_id(&with_legacy, "HERALD_GROUP_ID")?;

        let api_base = non_empty("HERALD_TELEGRAM_API_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_TELEGRAM_API.to_string());

        let state_dir = non_empty("HERALD_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir);

        let dispatch_interval = match non_empty("HERALD_DISPATCH_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| {
                        format!("HERALD_DISPATCH_INTERVAL_SECS must be a number, got {raw:?}")
                    })?;
                if secs == 0 {
                    bail!("HERALD_DISPATCH_INTERVAL_SECS must be greater than zero");
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_DISPATCH_INTERVAL,
        };

        let delivery_policy = match non_empty("HERALD_MAX_DELIVERY_ATTEMPTS") {
            Some(raw) => {
                let max_attempts: u32 = raw
                    .trim()
                    .parse()
                    .with_context(|| {
                        format!("HERALD_MAX_DELIVERY_ATTEMPTS must be a number, got {raw:?}")
                    })?;
                if max_attempts == 0 {
                    bail!("HERALD_MAX_DELIVERY_ATTEMPTS must be at least 1");
                }
                DeliveryPolicy { max_attempts }
            }
            None => DeliveryPolicy::default(),
        };

        Ok(Self {
            telegram: TelegramConfig {
                bot_token: bot_token.trim().to_string(),
                api_base,
            },
            channel_id,
            group_id,
            state_dir,
            dispatch_interval,
            delivery_policy,
        })
    }
}

fn required_chat_id<F>(lookup: &F, key: &str) -> anyhow::Result<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        bail!("{key} is not set");
    };
    raw.trim()
        .parse::<i64>()
        .with_context(|| format!("{key} must be a numeric chat id, got {raw:?}"))
}

/// State directory: explicit flag, then `HERALD_STATE_DIR`, then the
/// platform data directory.
pub fn resolve_state_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    if let Ok(dir) = std::env::var("HERALD_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    default_state_dir()
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("herald"))
        .unwrap_or_else(|| PathBuf::from(".herald"))
}
