//! Route lookup for previews.
//!
//! # Responsibilities
//! - Compile the routes of a tree into priority order
//! - Report which route a described request would hit
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Higher priority first, then name, so ties resolve deterministically
//! - Routes whose rule fails to parse are skipped, never matched

use crate::tree::{ConfigTree, Route};

use super::matcher::RequestAttrs;
use super::rule::{parse_rule, RuleExpr};

/// Compiled, priority-ordered route table.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<(Route, RuleExpr)>,
}

impl RouteTable {
    pub fn from_tree(tree: &ConfigTree) -> Self {
        let mut routes: Vec<(Route, RuleExpr)> = tree
            .routes
            .iter()
            .filter_map(|route| match parse_rule(&route.rule) {
                Ok(expr) => Some((route.clone(), expr)),
                Err(e) => {
                    tracing::warn!(route = %route.name, error = %e, "Skipping route with unparseable rule");
                    None
                }
            })
            .collect();

        routes.sort_by(|(a, _), (b, _)| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Self { routes }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First route (by priority) matching the request on `entry_point`.
    pub fn match_request(&self, entry_point: Option<&str>, req: &RequestAttrs) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|(route, _)| match entry_point {
                Some(ep) => route.entry_points.is_empty() || route.entry_points.contains(ep),
                None => true,
            })
            .find(|(_, rule)| rule.matches(req))
            .map(|(route, _)| route)
    }
}
