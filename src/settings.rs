use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;
use url::Url;

use crate::aggregate::{Pricing, DEFAULT_TOPIC_LIMIT, DEFAULT_TOP_USERS_LIMIT};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:7071";

pub const ENV_API_BASE_URL: &str = "DASHBOARD_API_BASE_URL";
pub const ENV_INCLUDE_USERS: &str = "DASHBOARD_INCLUDE_USERS";
pub const ENV_TOPIC_LIMIT: &str = "DASHBOARD_TOPIC_LIMIT";
pub const ENV_TOP_USERS_LIMIT: &str = "DASHBOARD_TOP_USERS_LIMIT";
pub const ENV_USER_PRICE: &str = "DASHBOARD_USER_PRICE_PER_MILLION";
pub const ENV_ASSISTANT_PRICE: &str = "DASHBOARD_ASSISTANT_PRICE_PER_MILLION";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PricingOverrides {
    pub user_per_million: Option<f64>,
    pub assistant_per_million: Option<f64>,
}

/// One configuration layer. Unset fields fall through to the next layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DashboardSettings {
    pub api_base_url: Option<String>,
    pub include_users: Option<bool>,
    pub topic_limit: Option<usize>,
    pub top_users_limit: Option<usize>,
    pub pricing: Option<PricingOverrides>,
}

impl DashboardSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let user_price = parse_price(&lookup, ENV_USER_PRICE);
        let assistant_price = parse_price(&lookup, ENV_ASSISTANT_PRICE);
        let pricing = (user_price.is_some() || assistant_price.is_some()).then_some(PricingOverrides {
            user_per_million: user_price,
            assistant_per_million: assistant_price,
        });
        Self {
            api_base_url: lookup(ENV_API_BASE_URL).filter(|v| !v.trim().is_empty()),
            include_users: lookup(ENV_INCLUDE_USERS).and_then(|raw| {
                let parsed = parse_flag(&raw);
                if parsed.is_none() {
                    warn!(key = ENV_INCLUDE_USERS, value = %raw, "ignoring unparsable setting");
                }
                parsed
            }),
            topic_limit: parse_var(&lookup, ENV_TOPIC_LIMIT),
            top_users_limit: parse_var(&lookup, ENV_TOP_USERS_LIMIT),
            pricing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub api_base_url: Url,
    pub include_users: bool,
    pub topic_limit: usize,
    pub top_users_limit: usize,
    pub pricing: Pricing,
}

/// Command line beats environment, environment beats built-in defaults.
pub fn resolve_effective_settings(
    env: &DashboardSettings,
    cli: &DashboardSettings,
) -> anyhow::Result<EffectiveSettings> {
    let raw_url = cli
        .api_base_url
        .clone()
        .or_else(|| env.api_base_url.clone())
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.into());
    let api_base_url = Url::parse(&raw_url)
        .map_err(|e| anyhow::anyhow!("invalid api base url {raw_url:?}: {e}"))?;
    if !matches!(api_base_url.scheme(), "http" | "https") {
        anyhow::bail!("api base url must be http or https, got {}", api_base_url.scheme());
    }

    if let Some(p) = &cli.pricing {
        for (name, price) in [("user", p.user_per_million), ("assistant", p.assistant_per_million)] {
            if let Some(price) = price.filter(|v| !valid_price(*v)) {
                anyhow::bail!("{name} price must be a finite, non-negative number, got {price}");
            }
        }
    }

    let defaults = Pricing::default();
    let pricing = Pricing {
        user_per_million: cli
            .pricing
            .as_ref()
            .and_then(|p| p.user_per_million)
            .or_else(|| env.pricing.as_ref().and_then(|p| p.user_per_million))
            .unwrap_or(defaults.user_per_million),
        assistant_per_million: cli
            .pricing
            .as_ref()
            .and_then(|p| p.assistant_per_million)
            .or_else(|| env.pricing.as_ref().and_then(|p| p.assistant_per_million))
            .unwrap_or(defaults.assistant_per_million),
    };

    Ok(EffectiveSettings {
        api_base_url,
        include_users: cli.include_users.or(env.include_users).unwrap_or(false),
        topic_limit: cli.topic_limit.or(env.topic_limit).unwrap_or(DEFAULT_TOPIC_LIMIT),
        top_users_limit: cli
            .top_users_limit
            .or(env.top_users_limit)
            .unwrap_or(DEFAULT_TOP_USERS_LIMIT),
        pricing,
    })
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

fn valid_price(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

fn parse_price(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<f64> {
    let price = parse_var::<f64>(lookup, key)?;
    if valid_price(price) {
        Some(price)
    } else {
        warn!(key, value = price, "ignoring invalid price");
        None
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
