//! Middleware definitions.
//!
//! # Design Decisions
//! - On disk a middleware is `{name, type, config}`, exactly what the proxy reads
//! - Each `type` has its own typed schema (`MiddlewareSpec` variant); the type
//!   tag selects which schema the `config` table is decoded against
//! - Durations accept `"500ms"`, `"10s"`, `"1m30s"`, `"2h"` or bare seconds

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{de, Deserialize, Deserializer, Serialize};

use super::Named;

/// Middleware type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MiddlewareKind {
    BasicAuth,
    RateLimit,
    RedirectScheme,
    Compress,
    Headers,
    StripPrefix,
    AddPrefix,
    CircuitBreaker,
    Retry,
    IpAllowList,
}

impl MiddlewareKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BasicAuth => "basic-auth",
            Self::RateLimit => "rate-limit",
            Self::RedirectScheme => "redirect-scheme",
            Self::Compress => "compress",
            Self::Headers => "headers",
            Self::StripPrefix => "strip-prefix",
            Self::AddPrefix => "add-prefix",
            Self::CircuitBreaker => "circuit-breaker",
            Self::Retry => "retry",
            Self::IpAllowList => "ip-allow-list",
        }
    }
}

impl fmt::Display for MiddlewareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named middleware as stored in a middleware document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Middleware {
    /// Unique middleware name.
    pub name: String,

    /// Type tag selecting the config schema.
    #[serde(rename = "type")]
    pub kind: MiddlewareKind,

    /// Type-specific settings.
    #[serde(default)]
    pub config: toml::Table,
}

impl Middleware {
    pub fn new(name: impl Into<String>, kind: MiddlewareKind, config: toml::Table) -> Self {
        Self {
            name: name.into(),
            kind,
            config,
        }
    }

    /// Decode `config` against the schema selected by `kind`.
    pub fn spec(&self) -> Result<MiddlewareSpec, toml::de::Error> {
        MiddlewareSpec::decode(self.kind, &self.config)
    }
}

impl Named for Middleware {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Typed middleware configuration, one variant per type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareSpec {
    BasicAuth(BasicAuthConfig),
    RateLimit(RateLimitConfig),
    RedirectScheme(RedirectSchemeConfig),
    Compress(CompressConfig),
    Headers(HeadersConfig),
    StripPrefix(StripPrefixConfig),
    AddPrefix(AddPrefixConfig),
    CircuitBreaker(CircuitBreakerConfig),
    Retry(RetryConfig),
    IpAllowList(IpAllowListConfig),
}

impl MiddlewareSpec {
    pub fn decode(kind: MiddlewareKind, config: &toml::Table) -> Result<Self, toml::de::Error> {
        let value = toml::Value::Table(config.clone());
        let spec = match kind {
            MiddlewareKind::BasicAuth => Self::BasicAuth(value.try_into()?),
            MiddlewareKind::RateLimit => Self::RateLimit(value.try_into()?),
            MiddlewareKind::RedirectScheme => Self::RedirectScheme(value.try_into()?),
            MiddlewareKind::Compress => Self::Compress(value.try_into()?),
            MiddlewareKind::Headers => Self::Headers(value.try_into()?),
            MiddlewareKind::StripPrefix => Self::StripPrefix(value.try_into()?),
            MiddlewareKind::AddPrefix => Self::AddPrefix(value.try_into()?),
            MiddlewareKind::CircuitBreaker => Self::CircuitBreaker(value.try_into()?),
            MiddlewareKind::Retry => Self::Retry(value.try_into()?),
            MiddlewareKind::IpAllowList => Self::IpAllowList(value.try_into()?),
        };
        Ok(spec)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BasicAuthConfig {
    /// `user:hash` pairs.
    pub users: Vec<String>,
    #[serde(default)]
    pub realm: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per `period`.
    pub average: u64,
    pub period: ConfigDuration,
    #[serde(default)]
    pub burst: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RedirectSchemeConfig {
    pub scheme: String,
    #[serde(default)]
    pub permanent: bool,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CompressConfig {
    #[serde(default)]
    pub excluded_content_types: Vec<String>,
    #[serde(default)]
    pub min_response_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct HeadersConfig {
    #[serde(default)]
    pub custom_request_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub custom_response_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StripPrefixConfig {
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddPrefixConfig {
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Trip expression, e.g. `NetworkErrorRatio() > 0.30`.
    pub expression: String,
    #[serde(default)]
    pub check_period: Option<ConfigDuration>,
    #[serde(default)]
    pub fallback_duration: Option<ConfigDuration>,
    #[serde(default)]
    pub recovery_duration: Option<ConfigDuration>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    #[serde(default)]
    pub initial_interval: Option<ConfigDuration>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IpAllowListConfig {
    /// IP addresses or CIDR ranges.
    pub source_range: Vec<String>,
}

/// Duration written either as text (`"10s"`) or as whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigDuration(pub Duration);

impl<'de> Deserialize<'de> for ConfigDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Self(Duration::from_secs(secs))),
            Raw::Text(text) => parse_duration(&text)
                .map(Self)
                .ok_or_else(|| de::Error::custom(format!("invalid duration `{text}`"))),
        }
    }
}

/// Parse `"1h"`, `"1m30s"`, `"250ms"` or `"15"` (seconds).
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(secs) = text.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let amount: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.checked_mul(60)?),
            "h" => Duration::from_secs(amount.checked_mul(3600)?),
            _ => return None,
        };
        total = total.checked_add(part)?;
        rest = &rest[unit_len..];
    }
    Some(total)
}
