use std::time::Duration;

use anyhow::Context as _;
use sha2::{Digest as _, Sha256};

use crate::app::navigation::ProgressDebounce;
use crate::app::payment::PaymentMode;
use crate::app::purchase::DEFAULT_PURCHASE_TIMEOUT;

/// Whose state a data directory namespace belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageScope {
    /// One shared namespace per device, regardless of who logs in.
    Device,
    /// One namespace per user id; anonymous sessions fall back to the device.
    User,
}

impl StorageScope {
    pub fn from_env() -> anyhow::Result<Self> {
        let raw =
            std::env::var("STORYSHELF_STORAGE_SCOPE").unwrap_or_else(|_| "device".to_string());
        Self::parse(&raw).with_context(|| {
            format!("invalid STORYSHELF_STORAGE_SCOPE={raw:?}. expected one of: device, user")
        })
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "device" => Ok(Self::Device),
            "user" => Ok(Self::User),
            other => anyhow::bail!("unsupported storage scope: {other}"),
        }
    }

    pub fn namespace(self, user_id: Option<&str>) -> String {
        match (self, user_id) {
            (Self::User, Some(user_id)) => {
                let digest = hex::encode(Sha256::digest(user_id.as_bytes()));
                format!("user-{}", &digest[..16])
            }
            _ => "device".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    pub scope: StorageScope,
    pub payment_mode: PaymentMode,
    pub payment_latency: Duration,
    pub purchase_timeout: Duration,
    pub progress_debounce: ProgressDebounce,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            scope: StorageScope::Device,
            payment_mode: PaymentMode::Approve,
            payment_latency: Duration::from_millis(300),
            purchase_timeout: DEFAULT_PURCHASE_TIMEOUT,
            progress_debounce: ProgressDebounce::default(),
        }
    }
}

impl StorefrontConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            scope: StorageScope::from_env()?,
            payment_mode: PaymentMode::from_env()?,
            payment_latency: env_millis("STORYSHELF_PAYMENT_LATENCY_MS")?
                .unwrap_or(defaults.payment_latency),
            purchase_timeout: env_millis("STORYSHELF_PURCHASE_TIMEOUT_MS")?
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.purchase_timeout),
            progress_debounce: ProgressDebounce {
                min_interval: env_millis("STORYSHELF_PROGRESS_MIN_INTERVAL_MS")?
                    .unwrap_or(defaults.progress_debounce.min_interval),
                min_delta: env_parse::<u8>("STORYSHELF_PROGRESS_MIN_DELTA")?
                    .map(|d| d.clamp(1, 100))
                    .unwrap_or(defaults.progress_debounce.min_delta),
            },
        })
    }
}

fn env_millis(name: &str) -> anyhow::Result<Option<Duration>> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_millis))
}

fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .with_context(|| format!("invalid {name}={raw:?}"))
}
