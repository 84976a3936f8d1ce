//! Configuration validator.
//!
//! # Responsibilities
//! - Check a single candidate entity (route, middleware, certificate)
//! - Check the full merged tree before commit: uniqueness across documents,
//!   reference resolution, priority tie-breaks
//! - Check raw documents for their required top-level section
//!
//! # Design Decisions
//! - Pure functions: `&ConfigTree → Vec<Violation>`, no I/O
//! - Collects every violation instead of stopping at the first
//! - A locally valid entity can still make the tree invalid, so the manager
//!   always runs `validate` on the merged candidate

pub mod document;
pub mod middleware;

use std::collections::{BTreeMap, HashSet};

use regex::Regex;

use crate::error::{Violation, ViolationKind};
use crate::routing::{may_overlap, parse_rule, RuleExpr};
use crate::tree::{Certificate, ConfigTree, Middleware, Route, StaticSettings};

pub use document::{parse_document, validate_document, DocumentKind};

/// Validate a full candidate tree.
pub fn validate(tree: &ConfigTree) -> Result<(), Vec<Violation>> {
    let violations = validate_tree(tree);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Every violation in `tree`, in a stable order.
pub fn validate_tree(tree: &ConfigTree) -> Vec<Violation> {
    let mut out = validate_settings(&tree.settings);

    for mw in tree.middlewares.iter() {
        out.extend(validate_middleware(mw));
    }
    out.extend(duplicate_names(
        "middlewares",
        "middleware",
        tree.middlewares
            .documents()
            .iter()
            .flat_map(|d| d.items.iter().map(move |m| (m.name.as_str(), d.path.as_str()))),
    ));

    for route in tree.routes.iter() {
        out.extend(validate_route(route));
        out.extend(route_references(route, tree));
    }
    out.extend(duplicate_names(
        "routes",
        "route",
        tree.routes
            .documents()
            .iter()
            .flat_map(|d| d.items.iter().map(move |r| (r.name.as_str(), d.path.as_str()))),
    ));
    out.extend(ambiguous_priorities(tree));

    let mut domains = HashSet::new();
    for cert in &tree.certificates.certificates {
        out.extend(validate_certificate(cert));
        if !tree.settings.cert_resolvers.contains_key(&cert.resolver) {
            out.push(Violation::new(
                ViolationKind::UnresolvedReference,
                format!("certificates[{}].resolver", cert.domain),
                format!("certificate resolver `{}` is not declared", cert.resolver),
            ));
        }
        if !domains.insert(cert.domain.to_ascii_lowercase()) {
            out.push(Violation::new(
                ViolationKind::Duplicate,
                format!("certificates[{}]", cert.domain),
                format!("certificate for `{}` is registered more than once", cert.domain),
            ));
        }
    }

    out
}

/// Checks that need nothing but the route itself.
pub fn validate_route(route: &Route) -> Vec<Violation> {
    let mut out = Vec::new();
    let at = |field: &str| format!("routes[{}].{field}", route.name);

    if let Some(v) = check_name("routes", &route.name) {
        out.push(v);
    }

    match parse_rule(&route.rule) {
        Ok(expr) => out.extend(regex_arguments(&expr, &at("rule"))),
        Err(e) => out.push(Violation::new(ViolationKind::InvalidRule, at("rule"), e.to_string())),
    }

    if route.service.trim().is_empty() {
        out.push(Violation::new(
            ViolationKind::MissingField,
            at("service"),
            "service reference must not be empty",
        ));
    }

    if route.cert_resolver.is_some() && !route.tls {
        out.push(Violation::new(
            ViolationKind::InvalidValue,
            at("cert_resolver"),
            "cert_resolver requires tls = true",
        ));
    }

    out
}

/// Checks that need nothing but the middleware itself.
pub fn validate_middleware(mw: &Middleware) -> Vec<Violation> {
    let mut out = Vec::new();
    if let Some(v) = check_name("middlewares", &mw.name) {
        out.push(v);
    }
    out.extend(middleware::check_config(mw));
    out
}

/// Checks that need nothing but the certificate itself.
pub fn validate_certificate(cert: &Certificate) -> Vec<Violation> {
    let mut out = Vec::new();
    let at = |field: &str| format!("certificates[{}].{field}", cert.domain);

    if !is_valid_host_name(&cert.domain) {
        out.push(Violation::new(
            ViolationKind::InvalidValue,
            at("domain"),
            format!("`{}` is not a valid host name", cert.domain),
        ));
    }
    for (i, alt) in cert.alternate_names.iter().enumerate() {
        if !is_valid_host_name(alt) {
            out.push(Violation::new(
                ViolationKind::InvalidValue,
                at(&format!("alternate_names[{i}]")),
                format!("`{alt}` is not a valid host name"),
            ));
        }
    }
    if cert.resolver.trim().is_empty() {
        out.push(Violation::new(
            ViolationKind::MissingField,
            at("resolver"),
            "resolver must not be empty",
        ));
    }
    if let Some(contact) = &cert.contact {
        if !contact.contains('@') {
            out.push(Violation::new(
                ViolationKind::InvalidValue,
                at("contact"),
                format!("`{contact}` is not an e-mail address"),
            ));
        }
    }
    out
}

/// Entry points and certificate resolvers.
pub fn validate_settings(settings: &StaticSettings) -> Vec<Violation> {
    let mut out = Vec::new();
    if settings.entry_points.is_empty() {
        out.push(Violation::new(
            ViolationKind::MissingSection,
            "entry_points",
            "at least one entry point is required",
        ));
    }
    for (name, ep) in &settings.entry_points {
        if ep.address.trim().is_empty() {
            out.push(Violation::new(
                ViolationKind::MissingField,
                format!("entry_points[{name}].address"),
                "address must not be empty",
            ));
        }
    }
    for (name, resolver) in &settings.cert_resolvers {
        if resolver.storage.trim().is_empty() {
            out.push(Violation::new(
                ViolationKind::MissingField,
                format!("cert_resolvers[{name}].storage"),
                "storage must not be empty",
            ));
        }
        if resolver.email.as_deref().is_some_and(|e| !e.contains('@')) {
            out.push(Violation::new(
                ViolationKind::InvalidValue,
                format!("cert_resolvers[{name}].email"),
                "email must be an e-mail address",
            ));
        }
    }
    out
}

fn route_references(route: &Route, tree: &ConfigTree) -> Vec<Violation> {
    let mut out = Vec::new();

    for (i, mw) in route.middlewares.iter().enumerate() {
        if !tree.middlewares.contains(mw) {
            out.push(Violation::new(
                ViolationKind::UnresolvedReference,
                format!("routes[{}].middlewares[{i}]", route.name),
                format!("middleware `{mw}` does not exist"),
            ));
        }
    }

    for ep in &route.entry_points {
        if !tree.settings.entry_points.contains_key(ep) {
            out.push(Violation::new(
                ViolationKind::UnresolvedReference,
                format!("routes[{}].entry_points", route.name),
                format!("entry point `{ep}` is not declared"),
            ));
        }
    }

    if let Some(resolver) = &route.cert_resolver {
        if !tree.settings.cert_resolvers.contains_key(resolver) {
            out.push(Violation::new(
                ViolationKind::UnresolvedReference,
                format!("routes[{}].cert_resolver", route.name),
                format!("certificate resolver `{resolver}` is not declared"),
            ));
        }
    }

    out
}

fn duplicate_names<'a>(
    section: &str,
    label: &str,
    entries: impl Iterator<Item = (&'a str, &'a str)>,
) -> Vec<Violation> {
    let mut seen: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, document) in entries {
        seen.entry(name).or_default().push(document);
    }

    seen.into_iter()
        .filter(|(_, docs)| docs.len() > 1)
        .map(|(name, docs)| {
            Violation::new(
                ViolationKind::Duplicate,
                format!("{section}[{name}]"),
                format!("{label} `{name}` is defined {} times ({})", docs.len(), docs.join(", ")),
            )
        })
        .collect()
}

/// Equal-priority routes that share an entry point and may match the same request.
fn ambiguous_priorities(tree: &ConfigTree) -> Vec<Violation> {
    let parsed: Vec<(&Route, RuleExpr)> = tree
        .routes
        .iter()
        .filter_map(|r| parse_rule(&r.rule).ok().map(|expr| (r, expr)))
        .collect();

    let mut out = Vec::new();
    for (i, (a, rule_a)) in parsed.iter().enumerate() {
        for (b, rule_b) in &parsed[i + 1..] {
            if a.name == b.name || a.priority != b.priority || !a.shares_entry_point(b) {
                continue;
            }
            if may_overlap(rule_a, rule_b) {
                out.push(Violation::new(
                    ViolationKind::AmbiguousPriority,
                    format!("routes[{}].priority", b.name),
                    format!(
                        "overlaps route `{}` at equal priority {}; give one a higher priority",
                        a.name, a.priority
                    ),
                ));
            }
        }
    }
    out
}

fn regex_arguments(expr: &RuleExpr, path: &str) -> Vec<Violation> {
    let mut out = Vec::new();
    for call in expr.matchers() {
        for &idx in call.kind.regex_args() {
            if let Some(pattern) = call.args.get(idx) {
                if let Err(e) = Regex::new(pattern) {
                    out.push(Violation::new(
                        ViolationKind::InvalidRule,
                        path,
                        format!("{} pattern `{pattern}` does not compile: {e}", call.kind),
                    ));
                }
            }
        }
    }
    out
}

fn check_name(section: &str, name: &str) -> Option<Violation> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    (!valid).then(|| {
        Violation::new(
            ViolationKind::InvalidValue,
            format!("{section}[{name}].name"),
            "names must start with a letter or digit and contain only letters, digits, `-`, `_` or `.`",
        )
    })
}

/// DNS host name, optionally with a leading `*.` wildcard label.
pub fn is_valid_host_name(name: &str) -> bool {
    let name = name.strip_prefix("*.").unwrap_or(name);
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = name.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
