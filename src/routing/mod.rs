//! Match-rule subsystem.
//!
//! # Data Flow
//! ```text
//! rule string
//!     → rule.rs (parse into RuleExpr, reject unknown matchers / bad grouping)
//!     → overlap.rs (prove two rules disjoint, for the priority check)
//!     → matcher.rs (evaluate against RequestAttrs)
//!     → router.rs (priority-ordered preview table)
//! ```
//!
//! # Design Decisions
//! - The grammar is the one the proxy consumes; nothing is translated
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod overlap;
pub mod router;
pub mod rule;

pub use matcher::{parse_ip_range, IpRange, RequestAttrs};
pub use overlap::may_overlap;
pub use router::RouteTable;
pub use rule::{parse_rule, MatcherCall, MatcherKind, RuleError, RuleExpr};
