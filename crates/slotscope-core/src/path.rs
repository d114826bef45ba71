//! Access paths into a state variable
//!
//! A [`VariablePath`] names one logical value: a base state variable plus
//! zero or more steps into it. The textual form is the familiar Solidity
//! expression syntax, `balances[0xabc…]`, `positions[3].owner`,
//! `allowances[0x1…][0x2…]`.

use crate::error::SlotScopeError;
use alloy_primitives::U256;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// One step into a container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "step", content = "value")]
pub enum AccessStep {
    /// Array index
    Index(U256),
    /// Bracket literal as written; an index or a mapping key depending on
    /// the container it is applied to
    Key(String),
    /// Struct member
    Field(String),
}

impl fmt::Display for AccessStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessStep::Index(i) => write!(f, "[{}]", i),
            AccessStep::Key(k) => write!(f, "[{}]", k),
            AccessStep::Field(name) => write!(f, ".{}", name),
        }
    }
}

/// A base variable plus the steps applied to it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariablePath {
    pub base: String,
    pub steps: Vec<AccessStep>,
}

impl VariablePath {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into(), steps: Vec::new() }
    }

    /// Extend the path by one step, returning a new path
    pub fn child(&self, step: AccessStep) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { base: self.base.clone(), steps }
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    /// The same path cut down to at most `max` steps
    pub fn truncated(&self, max: usize) -> Self {
        Self {
            base: self.base.clone(),
            steps: self.steps.iter().take(max).cloned().collect(),
        }
    }

    /// Parse a path expression such as `positions[3].owner`
    ///
    /// Bracket contents become [`AccessStep::Key`] with the literal kept
    /// as written (surrounding quotes dropped), so `names["007"]` and
    /// `names[7]` stay distinct string keys. Whether a literal is an array
    /// index or a mapping key is decided against the container it lands on.
    pub fn parse(query: &str) -> Result<Self, SlotScopeError> {
        let query = query.trim();
        let base_end = query.find(['[', '.']).unwrap_or(query.len());
        let base = query[..base_end].trim();
        if base.is_empty() || !is_identifier(base) {
            return Err(SlotScopeError::InvalidAccessPath(format!(
                "Invalid variable name in query: {}",
                query
            )));
        }

        let mut path = VariablePath::new(base);
        let mut rest = &query[base_end..];
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('[') {
                let end = after.find(']').ok_or_else(|| {
                    SlotScopeError::InvalidAccessPath(format!("Unclosed bracket in query: {}", query))
                })?;
                path.steps.push(parse_bracket(&after[..end])?);
                rest = &after[end + 1..];
            } else if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['[', '.']).unwrap_or(after.len());
                let field = after[..end].trim();
                if !is_identifier(field) {
                    return Err(SlotScopeError::InvalidAccessPath(format!(
                        "Invalid struct field access in query: {}",
                        query
                    )));
                }
                path.steps.push(AccessStep::Field(field.to_string()));
                rest = &after[end..];
            } else {
                return Err(SlotScopeError::InvalidAccessPath(format!(
                    "Unexpected input '{}' in query: {}",
                    rest, query
                )));
            }
        }
        Ok(path)
    }
}

impl fmt::Display for VariablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)?;
        for step in &self.steps {
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

impl FromStr for VariablePath {
    type Err = SlotScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VariablePath::parse(s)
    }
}

/// Turn one `[...]` into a step
pub fn parse_bracket(raw: &str) -> Result<AccessStep, SlotScopeError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SlotScopeError::InvalidAccessPath("Empty brackets in query".to_string()));
    }
    let unquoted = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .unwrap_or(raw);
    Ok(AccessStep::Key(unquoted.to_string()))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_simple_field() {
        let path = VariablePath::parse("totalSupply").unwrap();
        assert_eq!(path.base, "totalSupply");
        assert!(path.steps.is_empty());
    }

    #[test]
    fn test_parse_mapping_and_field() {
        let path = VariablePath::parse("positions[0xAbC0000000000000000000000000000000000001].owner").unwrap();
        assert_eq!(path.base, "positions");
        assert_eq!(
            path.steps,
            vec![
                AccessStep::Key("0xAbC0000000000000000000000000000000000001".into()),
                AccessStep::Field("owner".into()),
            ]
        );
    }

    #[test]
    fn test_parse_keeps_numeric_literals() {
        let path = VariablePath::parse("matrix[2][007]").unwrap();
        assert_eq!(path.steps, vec![AccessStep::Key("2".into()), AccessStep::Key("007".into())]);
        assert_eq!(path.to_string(), "matrix[2][007]");

        // longer than any 256-bit number; still a valid string key
        let digits = "9".repeat(100);
        let path = VariablePath::parse(&format!("names[{}]", digits)).unwrap();
        assert_eq!(path.steps, vec![AccessStep::Key(digits)]);
    }

    #[test]
    fn test_parse_quoted_string_key() {
        let path = VariablePath::parse("names[\"alice\"]").unwrap();
        assert_eq!(path.steps, vec![AccessStep::Key("alice".into())]);
    }

    #[test]
    fn test_display_round_trip() {
        let text = "pools[0x01].ticks[7].liquidity";
        let path = VariablePath::parse(text).unwrap();
        assert_eq!(path.to_string(), text);
        assert_eq!(path.depth(), 4);
    }

    #[test]
    fn test_parse_errors() {
        assert!(VariablePath::parse("").is_err());
        assert!(VariablePath::parse("balances[0x01").is_err());
        assert!(VariablePath::parse("balances[]").is_err());
        assert!(VariablePath::parse("s.").is_err());
        assert!(VariablePath::parse("1abc").is_err());
    }

    #[test]
    fn test_truncated() {
        let mut path = VariablePath::new("deep");
        for i in 0..25u64 {
            path = path.child(AccessStep::Index(U256::from(i)));
        }
        let cut = path.truncated(20);
        assert_eq!(cut.depth(), 20);
        assert_eq!(cut.steps[19], AccessStep::Index(U256::from(19)));
    }

    fn step_strategy() -> impl Strategy<Value = AccessStep> {
        prop_oneof![
            any::<u64>().prop_map(|i| AccessStep::Index(U256::from(i))),
            "0x[0-9a-f]{1,40}".prop_map(AccessStep::Key),
            "[a-z_][a-zA-Z0-9_]{0,12}".prop_map(AccessStep::Field),
        ]
    }

    proptest! {
        #[test]
        fn prop_display_parses_back(
            base in "[a-zA-Z_][a-zA-Z0-9_]{0,12}",
            steps in proptest::collection::vec(step_strategy(), 0..30),
        ) {
            let path = VariablePath { base, steps };
            let text = path.to_string();
            let parsed = VariablePath::parse(&text).unwrap();
            prop_assert_eq!(parsed.depth(), path.depth());
            prop_assert_eq!(parsed.to_string(), text);
        }
    }
}
