//! Per-type middleware configuration checks.
//!
//! Decoding into the typed `MiddlewareSpec` enforces required fields and value
//! types; the checks below cover what serde cannot express.

use crate::error::{Violation, ViolationKind};
use crate::routing::parse_ip_range;
use crate::tree::middleware::MiddlewareSpec;
use crate::tree::Middleware;

/// Violations in the type-specific configuration of `mw`.
pub fn check_config(mw: &Middleware) -> Vec<Violation> {
    let base = format!("middlewares[{}].config", mw.name);

    let spec = match mw.spec() {
        Ok(spec) => spec,
        Err(e) => {
            let message = format!("{} config: {}", mw.kind, e.message().trim());
            let kind = if message.contains("missing field") {
                ViolationKind::MissingField
            } else {
                ViolationKind::InvalidValue
            };
            return vec![Violation::new(kind, base, message)];
        }
    };

    let mut out = Vec::new();
    let mut invalid = |field: &str, message: String| {
        out.push(Violation::new(
            ViolationKind::InvalidValue,
            format!("{base}.{field}"),
            message,
        ));
    };

    match spec {
        MiddlewareSpec::BasicAuth(cfg) => {
            if cfg.users.is_empty() {
                invalid("users", "at least one `user:hash` entry is required".into());
            }
            for (i, user) in cfg.users.iter().enumerate() {
                match user.split_once(':') {
                    Some((name, hash)) if !name.is_empty() && !hash.is_empty() => {}
                    _ => invalid(&format!("users[{i}]"), "expected `user:hash`".into()),
                }
            }
        }
        MiddlewareSpec::RateLimit(cfg) => {
            if cfg.average == 0 {
                invalid("average", "average must be a positive integer".into());
            }
            if cfg.period.0.is_zero() {
                invalid("period", "period must be greater than zero".into());
            }
        }
        MiddlewareSpec::RedirectScheme(cfg) => {
            if !matches!(cfg.scheme.as_str(), "http" | "https") {
                invalid(
                    "scheme",
                    format!("scheme must be `http` or `https`, got `{}`", cfg.scheme),
                );
            }
            if cfg.port == Some(0) {
                invalid("port", "port must be between 1 and 65535".into());
            }
        }
        MiddlewareSpec::Compress(_) => {}
        MiddlewareSpec::Headers(cfg) => {
            if cfg.custom_request_headers.is_empty() && cfg.custom_response_headers.is_empty() {
                invalid(
                    "custom_request_headers",
                    "set at least one of custom_request_headers or custom_response_headers".into(),
                );
            }
        }
        MiddlewareSpec::StripPrefix(cfg) => {
            if cfg.prefixes.is_empty() {
                invalid("prefixes", "at least one prefix is required".into());
            }
            for (i, prefix) in cfg.prefixes.iter().enumerate() {
                if !prefix.starts_with('/') {
                    invalid(&format!("prefixes[{i}]"), format!("`{prefix}` must start with `/`"));
                }
            }
        }
        MiddlewareSpec::AddPrefix(cfg) => {
            if !cfg.prefix.starts_with('/') {
                invalid("prefix", format!("`{}` must start with `/`", cfg.prefix));
            }
        }
        MiddlewareSpec::CircuitBreaker(cfg) => {
            if cfg.expression.trim().is_empty() {
                invalid("expression", "expression must not be empty".into());
            }
        }
        MiddlewareSpec::Retry(cfg) => {
            if cfg.attempts == 0 {
                invalid("attempts", "attempts must be a positive integer".into());
            }
        }
        MiddlewareSpec::IpAllowList(cfg) => {
            if cfg.source_range.is_empty() {
                invalid("source_range", "at least one address or range is required".into());
            }
            for (i, range) in cfg.source_range.iter().enumerate() {
                if parse_ip_range(range).is_none() {
                    invalid(
                        &format!("source_range[{i}]"),
                        format!("`{range}` is not an IP address or CIDR range"),
                    );
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::MiddlewareKind;

    fn mw(kind: MiddlewareKind, config: &str) -> Middleware {
        let table: toml::Table = toml::from_str(config).unwrap();
        Middleware::new("m", kind, table)
    }

    fn kinds(mw: &Middleware) -> Vec<ViolationKind> {
        check_config(mw).iter().map(|v| v.kind).collect()
    }

    #[test]
    fn test_valid_configs_pass() {
        let ok = [
            mw(MiddlewareKind::BasicAuth, r#"users = ["admin:$apr1$x"]"#),
            mw(MiddlewareKind::RateLimit, "average = 100\nperiod = \"1m\"\nburst = 50"),
            mw(MiddlewareKind::RedirectScheme, r#"scheme = "https""#),
            mw(MiddlewareKind::Compress, ""),
            mw(MiddlewareKind::Headers, "[custom_response_headers]\nX-Frame-Options = \"DENY\""),
            mw(MiddlewareKind::StripPrefix, r#"prefixes = ["/api"]"#),
            mw(MiddlewareKind::AddPrefix, r#"prefix = "/v1""#),
            mw(MiddlewareKind::CircuitBreaker, r#"expression = "NetworkErrorRatio() > 0.3""#),
            mw(MiddlewareKind::Retry, "attempts = 3\ninitial_interval = \"100ms\""),
            mw(MiddlewareKind::IpAllowList, r#"source_range = ["10.0.0.0/8", "::1"]"#),
        ];
        for m in &ok {
            assert!(check_config(m).is_empty(), "{} should be valid", m.kind);
        }
    }

    #[test]
    fn test_missing_required_field() {
        assert_eq!(
            kinds(&mw(MiddlewareKind::RateLimit, r#"period = "1m""#)),
            vec![ViolationKind::MissingField]
        );
        assert_eq!(kinds(&mw(MiddlewareKind::Retry, "")), vec![ViolationKind::MissingField]);
    }

    #[test]
    fn test_semantic_failures() {
        assert_eq!(
            kinds(&mw(MiddlewareKind::RedirectScheme, r#"scheme = "ftp""#)),
            vec![ViolationKind::InvalidValue]
        );
        assert_eq!(
            kinds(&mw(MiddlewareKind::StripPrefix, r#"prefixes = ["api", "/ok"]"#)),
            vec![ViolationKind::InvalidValue]
        );
        assert_eq!(kinds(&mw(MiddlewareKind::Headers, "")), vec![ViolationKind::InvalidValue]);
        assert_eq!(
            kinds(&mw(MiddlewareKind::BasicAuth, r#"users = ["nohash"]"#)),
            vec![ViolationKind::InvalidValue]
        );
        assert_eq!(
            kinds(&mw(MiddlewareKind::IpAllowList, r#"source_range = ["10.0.0.0/40"]"#)),
            vec![ViolationKind::InvalidValue]
        );
    }

    #[test]
    fn test_bad_duration_is_invalid_value() {
        let violations = check_config(&mw(MiddlewareKind::RateLimit, "average = 1\nperiod = \"soon\""));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::InvalidValue);
        assert!(violations[0].message.contains("invalid duration"));
    }
}
