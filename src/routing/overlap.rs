//! Overlap analysis between match rules.
//!
//! # Responsibilities
//! - Decide whether two rules can match a common request
//! - Feed the equal-priority conflict check in the validator
//!
//! # Design Decisions
//! - Conservative: "may overlap" unless disjointness is proven
//! - Rules are expanded to disjunctive normal form; expansion is capped and
//!   anything bigger is treated as overlapping
//! - Disjointness is proven from exact hosts, methods, exact paths, path
//!   prefixes and exact header values; regex and negated matchers only ever
//!   widen the result

use std::collections::BTreeMap;

use super::rule::{MatcherCall, MatcherKind, RuleExpr};

const MAX_TERMS: usize = 64;

type Literal<'a> = (bool, &'a MatcherCall);
type Conjunction<'a> = Vec<Literal<'a>>;

/// Returns true unless the two rules provably never match the same request.
pub fn may_overlap(a: &RuleExpr, b: &RuleExpr) -> bool {
    let (Some(left), Some(right)) = (dnf(a, false), dnf(b, false)) else {
        return true;
    };

    left.iter().any(|l| {
        right.iter().any(|r| {
            let mut combined = l.clone();
            combined.extend(r.iter().copied());
            satisfiable(&combined)
        })
    })
}

fn dnf(expr: &RuleExpr, negated: bool) -> Option<Vec<Conjunction<'_>>> {
    match expr {
        RuleExpr::Matcher(call) => Some(vec![vec![(!negated, call)]]),
        RuleExpr::Not(inner) => dnf(inner, !negated),
        RuleExpr::And(l, r) if !negated => product(dnf(l, false)?, dnf(r, false)?),
        RuleExpr::Or(l, r) if negated => product(dnf(l, true)?, dnf(r, true)?),
        RuleExpr::And(l, r) | RuleExpr::Or(l, r) => {
            let mut terms = dnf(l, negated)?;
            terms.extend(dnf(r, negated)?);
            (terms.len() <= MAX_TERMS).then_some(terms)
        }
    }
}

fn product<'a>(
    left: Vec<Conjunction<'a>>,
    right: Vec<Conjunction<'a>>,
) -> Option<Vec<Conjunction<'a>>> {
    if left.len().saturating_mul(right.len()) > MAX_TERMS {
        return None;
    }
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in &left {
        for r in &right {
            let mut term = l.clone();
            term.extend(r.iter().copied());
            out.push(term);
        }
    }
    Some(out)
}

fn satisfiable(term: &[Literal<'_>]) -> bool {
    let positive: Vec<&MatcherCall> = term.iter().filter(|(p, _)| *p).map(|(_, c)| *c).collect();

    // A matcher required both to hold and not to hold.
    let contradiction = term
        .iter()
        .filter(|(p, _)| !*p)
        .any(|(_, neg)| positive.iter().any(|pos| *pos == *neg));
    if contradiction {
        return false;
    }

    exact_values_compatible(&positive, MatcherKind::Host, str::to_ascii_lowercase)
        && exact_values_compatible(&positive, MatcherKind::Method, str::to_ascii_uppercase)
        && paths_compatible(&positive)
        && headers_compatible(&positive)
}

/// Some value appears in every matcher of `kind` (vacuously true if none).
fn exact_values_compatible(calls: &[&MatcherCall], kind: MatcherKind, norm: fn(&str) -> String) -> bool {
    let sets: Vec<Vec<String>> = calls
        .iter()
        .filter(|c| c.kind == kind)
        .map(|c| c.args.iter().map(|a| norm(a.as_str())).collect())
        .collect();

    let Some(first) = sets.first() else {
        return true;
    };
    first
        .iter()
        .any(|candidate| sets.iter().all(|set| set.contains(candidate)))
}

/// Some path satisfies every `Path` and `PathPrefix` matcher.
///
/// If a satisfying path exists, either an exact path argument or the longest
/// chosen prefix is one too, so checking argument values as candidates is
/// complete.
fn paths_compatible(calls: &[&MatcherCall]) -> bool {
    let relevant: Vec<&MatcherCall> = calls
        .iter()
        .copied()
        .filter(|c| matches!(c.kind, MatcherKind::Path | MatcherKind::PathPrefix))
        .collect();
    if relevant.is_empty() {
        return true;
    }

    let satisfies = |candidate: &str, call: &MatcherCall| match call.kind {
        MatcherKind::Path => call.args.iter().any(|p| p == candidate),
        _ => call.args.iter().any(|p| candidate.starts_with(p.as_str())),
    };

    relevant
        .iter()
        .flat_map(|c| c.args.iter())
        .any(|candidate| relevant.iter().all(|call| satisfies(candidate.as_str(), call)))
}

/// Exact header constraints on the same header name agree.
fn headers_compatible(calls: &[&MatcherCall]) -> bool {
    let mut required: BTreeMap<String, &str> = BTreeMap::new();
    for call in calls.iter().filter(|c| c.kind == MatcherKind::Header) {
        let name = call.args[0].to_ascii_lowercase();
        match required.get(&name) {
            Some(existing) if *existing != call.args[1] => return false,
            _ => {
                required.insert(name, &call.args[1]);
            }
        }
    }
    true
}
