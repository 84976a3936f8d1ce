//! Static settings: entry points and certificate resolvers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Listener the proxy accepts traffic on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EntryPoint {
    /// Bind address, e.g. `":443"`.
    pub address: String,
}

/// ACME challenge used by a resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Challenge {
    #[default]
    Http,
    TlsAlpn,
    Dns,
}

/// Certificate resolver declaration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CertResolver {
    /// Account contact e-mail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// File the proxy stores issued certificates in.
    pub storage: String,

    #[serde(default)]
    pub challenge: Challenge,
}

/// Contents of `static.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StaticSettings {
    pub entry_points: BTreeMap<String, EntryPoint>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cert_resolvers: BTreeMap<String, CertResolver>,
}

impl Default for StaticSettings {
    fn default() -> Self {
        let mut entry_points = BTreeMap::new();
        entry_points.insert(
            "web".to_string(),
            EntryPoint {
                address: ":80".to_string(),
            },
        );
        entry_points.insert(
            "websecure".to_string(),
            EntryPoint {
                address: ":443".to_string(),
            },
        );
        Self {
            entry_points,
            cert_resolvers: BTreeMap::new(),
        }
    }
}

impl StaticSettings {
    pub fn with_resolver(mut self, name: impl Into<String>, storage: impl Into<String>) -> Self {
        self.cert_resolvers.insert(
            name.into(),
            CertResolver {
                email: None,
                storage: storage.into(),
                challenge: Challenge::Http,
            },
        );
        self
    }
}
