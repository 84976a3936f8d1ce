//! Match-rule grammar.
//!
//! ```text
//! rule    := or
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | primary
//! primary := "(" rule ")" | matcher
//! matcher := NAME "(" arg ( "," arg )* ")"
//! arg     := `backticked` | "quoted" | bare
//! ```
//!
//! # Design Decisions
//! - Bare arguments are accepted (`Host(api.example.com)`); anything containing
//!   `,`, `(`, `)` or whitespace must be quoted
//! - Nesting depth and the number of matchers are capped; every walk over a
//!   rule recurses once per node

use std::fmt;

use thiserror::Error;

const MAX_DEPTH: usize = 32;
const MAX_MATCHERS: usize = 128;

/// Recognised matcher keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    Host,
    HostRegexp,
    Path,
    PathPrefix,
    PathRegexp,
    Method,
    Header,
    HeaderRegexp,
    Query,
    ClientIp,
}

impl MatcherKind {
    pub const ALL: [MatcherKind; 10] = [
        Self::Host,
        Self::HostRegexp,
        Self::Path,
        Self::PathPrefix,
        Self::PathRegexp,
        Self::Method,
        Self::Header,
        Self::HeaderRegexp,
        Self::Query,
        Self::ClientIp,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Host => "Host",
            Self::HostRegexp => "HostRegexp",
            Self::Path => "Path",
            Self::PathPrefix => "PathPrefix",
            Self::PathRegexp => "PathRegexp",
            Self::Method => "Method",
            Self::Header => "Header",
            Self::HeaderRegexp => "HeaderRegexp",
            Self::Query => "Query",
            Self::ClientIp => "ClientIP",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.keyword() == word)
    }

    /// (minimum, maximum) argument count.
    fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::HostRegexp | Self::PathRegexp => (1, Some(1)),
            Self::Header | Self::HeaderRegexp => (2, Some(2)),
            Self::Query => (1, Some(2)),
            Self::Host | Self::Path | Self::PathPrefix | Self::Method | Self::ClientIp => (1, None),
        }
    }

    /// Matchers whose arguments are regular expressions.
    pub fn regex_args(self) -> &'static [usize] {
        match self {
            Self::HostRegexp | Self::PathRegexp => &[0],
            Self::HeaderRegexp => &[1],
            _ => &[],
        }
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One matcher invocation, e.g. ``Host(`a.com`, `b.com`)``.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatcherCall {
    pub kind: MatcherKind,
    pub args: Vec<String>,
}

/// Parsed match rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleExpr {
    Matcher(MatcherCall),
    Not(Box<RuleExpr>),
    And(Box<RuleExpr>, Box<RuleExpr>),
    Or(Box<RuleExpr>, Box<RuleExpr>),
}

impl RuleExpr {
    /// Every matcher call in the expression, left to right.
    pub fn matchers(&self) -> Vec<&MatcherCall> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a MatcherCall>) {
        match self {
            Self::Matcher(call) => out.push(call),
            Self::Not(inner) => inner.collect(out),
            Self::And(l, r) | Self::Or(l, r) => {
                l.collect(out);
                r.collect(out);
            }
        }
    }
}

/// Rule parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at offset {offset})")]
pub struct RuleError {
    pub offset: usize,
    pub message: String,
}

/// Parse a match rule.
pub fn parse_rule(input: &str) -> Result<RuleExpr, RuleError> {
    let mut parser = Parser {
        src: input,
        pos: 0,
        depth: 0,
        matchers: 0,
    };

    parser.skip_ws();
    if parser.rest().is_empty() {
        return Err(parser.error("empty rule"));
    }

    let expr = parser.parse_or()?;

    parser.skip_ws();
    let rest = parser.rest();
    if rest.starts_with(')') {
        return Err(parser.error("unbalanced grouping: unexpected `)`"));
    }
    if !rest.is_empty() {
        let snippet: String = rest.chars().take(16).collect();
        return Err(parser.error(format!("unexpected input `{snippet}`")));
    }
    Ok(expr)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
    matchers: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> RuleError {
        RuleError {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn parse_or(&mut self) -> Result<RuleExpr, RuleError> {
        let mut lhs = self.parse_and()?;
        while self.eat("||") {
            let rhs = self.parse_and()?;
            lhs = RuleExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<RuleExpr, RuleError> {
        let mut lhs = self.parse_unary()?;
        while self.eat("&&") {
            let rhs = self.parse_unary()?;
            lhs = RuleExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<RuleExpr, RuleError> {
        if self.eat("!") {
            let inner = self.descend(Self::parse_unary)?;
            return Ok(RuleExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<RuleExpr, RuleError> {
        if self.eat("(") {
            let inner = self.descend(Self::parse_or)?;
            if !self.eat(")") {
                return Err(self.error("unbalanced grouping: expected `)`"));
            }
            return Ok(inner);
        }
        self.parse_matcher()
    }

    fn descend(
        &mut self,
        f: fn(&mut Self) -> Result<RuleExpr, RuleError>,
    ) -> Result<RuleExpr, RuleError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("rule nested too deeply"));
        }
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn parse_matcher(&mut self) -> Result<RuleExpr, RuleError> {
        self.skip_ws();
        self.matchers += 1;
        if self.matchers > MAX_MATCHERS {
            return Err(self.error(format!("rule has more than {MAX_MATCHERS} matchers")));
        }
        let rest = self.rest();
        let len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected a matcher such as Host(...) or PathPrefix(...)"));
        }

        let word = &rest[..len];
        let kind = MatcherKind::from_keyword(word)
            .ok_or_else(|| self.error(format!("unknown matcher `{word}`")))?;
        self.pos += len;

        if !self.eat("(") {
            return Err(self.error(format!("expected `(` after {word}")));
        }

        let mut args = Vec::new();
        loop {
            args.push(self.parse_arg()?);
            if self.eat(",") {
                continue;
            }
            if self.eat(")") {
                break;
            }
            return Err(self.error(format!("expected `,` or `)` in {word}(...)")));
        }

        let (min, max) = kind.arity();
        if args.len() < min || max.is_some_and(|m| args.len() > m) {
            let expected = match max {
                Some(m) if m == min => format!("{min}"),
                Some(m) => format!("{min} to {m}"),
                None => format!("at least {min}"),
            };
            return Err(self.error(format!(
                "{word} takes {expected} argument(s), got {}",
                args.len()
            )));
        }

        Ok(RuleExpr::Matcher(MatcherCall { kind, args }))
    }

    fn parse_arg(&mut self) -> Result<String, RuleError> {
        self.skip_ws();
        let rest = self.rest();

        for quote in ['`', '"'] {
            if let Some(body) = rest.strip_prefix(quote) {
                let end = body
                    .find(quote)
                    .ok_or_else(|| self.error(format!("unterminated {quote}-quoted argument")))?;
                let value = body[..end].to_string();
                self.pos += end + 2;
                if value.is_empty() {
                    return Err(self.error("empty matcher argument"));
                }
                return Ok(value);
            }
        }

        let end = rest
            .find(|c: char| c == ',' || c == ')' || c == '(' || c.is_whitespace())
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(self.error("empty matcher argument"));
        }
        self.pos += end;
        Ok(rest[..end].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(kind: MatcherKind, args: &[&str]) -> RuleExpr {
        RuleExpr::Matcher(MatcherCall {
            kind,
            args: args.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_bare_and_quoted_arguments() {
        assert_eq!(
            parse_rule("Host(api.example.com)").unwrap(),
            call(MatcherKind::Host, &["api.example.com"])
        );
        assert_eq!(
            parse_rule("Host(`a.com`, \"b.com\")").unwrap(),
            call(MatcherKind::Host, &["a.com", "b.com"])
        );
    }

    #[test]
    fn test_precedence_and_over_or() {
        let expr = parse_rule("Host(`a`) || Host(`b`) && PathPrefix(`/x`)").unwrap();
        match expr {
            RuleExpr::Or(lhs, rhs) => {
                assert_eq!(*lhs, call(MatcherKind::Host, &["a"]));
                assert!(matches!(*rhs, RuleExpr::And(_, _)));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_grouping_and_negation() {
        let expr = parse_rule("!(Method(`POST`) || Method(`PUT`)) && Path(`/a`)").unwrap();
        assert!(matches!(expr, RuleExpr::And(ref l, _) if matches!(**l, RuleExpr::Not(_))));
        assert_eq!(expr.matchers().len(), 3);
    }

    #[test]
    fn test_rejects_unknown_matcher() {
        let err = parse_rule("bogus").unwrap_err();
        assert!(err.message.contains("unknown matcher `bogus`"));

        let err = parse_rule("Hots(`a`)").unwrap_err();
        assert!(err.message.contains("Hots"));
    }

    #[test]
    fn test_rejects_unbalanced_grouping() {
        assert!(parse_rule("(Host(`a`)").unwrap_err().message.contains("expected `)`"));
        assert!(parse_rule("Host(`a`))").unwrap_err().message.contains("unexpected `)`"));
        assert!(parse_rule("Host(`a`").is_err());
        assert!(parse_rule("Host(`a)").unwrap_err().message.contains("unterminated"));
    }

    #[test]
    fn test_arity_and_empty_rules() {
        assert!(parse_rule("").is_err());
        assert!(parse_rule("   ").is_err());
        assert!(parse_rule("Header(`X-Env`)").unwrap_err().message.contains("takes 2"));
        assert!(parse_rule("PathRegexp(`a`, `b`)").is_err());
        assert!(parse_rule("Host()").is_err());
        assert!(parse_rule("Host(`a`) & Path(`/`)").is_err());
    }

    #[test]
    fn test_matcher_count_cap() {
        let within = vec!["Host(`a.com`)"; 128].join(" && ");
        assert!(parse_rule(&within).is_ok());

        let flat = vec!["Host(`a.com`)"; 30_000].join("&&");
        let err = parse_rule(&flat).unwrap_err();
        assert!(err.message.contains("more than 128 matchers"));

        let mixed = vec!["Host(`a.com`)"; 200].join(" || ");
        assert!(parse_rule(&mixed).is_err());
    }

    #[test]
    fn test_depth_cap() {
        let deep = format!("{}Host(`a`){}", "(".repeat(40), ")".repeat(40));
        assert!(parse_rule(&deep).unwrap_err().message.contains("too deeply"));
    }
}
