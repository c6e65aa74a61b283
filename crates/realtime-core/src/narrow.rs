//! Narrow filters: ordered, conjunctive message/event queries.
//!
//! A filter has two wire encodings. Message search uses
//! `[{"operator":..,"operand":..,"negated":..}]`; queue registration uses
//! `[[operator, operand]]` with the operand rendered as a string and the
//! negation flag dropped.

use std::{borrow::Cow, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Narrow operator, for example `is` or `channel`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Operator(Cow<'static, str>);

impl Operator {
    pub const ID: Operator = Operator::from_static("id");
    pub const WITH: Operator = Operator::from_static("with");
    pub const NEAR: Operator = Operator::from_static("near");
    pub const CHANNEL: Operator = Operator::from_static("channel");
    pub const CHANNELS: Operator = Operator::from_static("channels");
    /// Legacy alias for `channel`.
    pub const STREAM: Operator = Operator::from_static("stream");
    /// Legacy alias for `channels`.
    pub const STREAMS: Operator = Operator::from_static("streams");
    pub const TOPIC: Operator = Operator::from_static("topic");
    pub const SENDER: Operator = Operator::from_static("sender");
    pub const SEARCH: Operator = Operator::from_static("search");
    pub const DM: Operator = Operator::from_static("dm");
    pub const DM_INCLUDING: Operator = Operator::from_static("dm-including");
    pub const IS: Operator = Operator::from_static("is");
    pub const HAS: Operator = Operator::from_static("has");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One `(operator, operand, negated)` term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Narrow {
    pub operator: Operator,
    pub operand: Value,
    pub negated: bool,
}

impl Narrow {
    pub fn new(operator: Operator, operand: impl Into<Value>) -> Self {
        Self {
            operator,
            operand: operand.into(),
            negated: false,
        }
    }

    pub fn negated(operator: Operator, operand: impl Into<Value>) -> Self {
        Self {
            negated: true,
            ..Self::new(operator, operand)
        }
    }

    /// Same term with the negation flag set.
    pub fn negate(mut self) -> Self {
        self.negated = true;
        self
    }

    pub fn is_unread() -> Self {
        Self::new(Operator::IS, "unread")
    }

    pub fn is_followed() -> Self {
        Self::new(Operator::IS, "followed")
    }

    pub fn is_dm() -> Self {
        Self::new(Operator::IS, "dm")
    }

    pub fn is_mentioned() -> Self {
        Self::new(Operator::IS, "mentioned")
    }

    pub fn is_starred() -> Self {
        Self::new(Operator::IS, "starred")
    }

    pub fn is_alerted() -> Self {
        Self::new(Operator::IS, "alerted")
    }

    pub fn has_attachment() -> Self {
        Self::new(Operator::HAS, "attachment")
    }

    pub fn has_image() -> Self {
        Self::new(Operator::HAS, "image")
    }

    pub fn has_link() -> Self {
        Self::new(Operator::HAS, "link")
    }

    pub fn has_reaction() -> Self {
        Self::new(Operator::HAS, "reaction")
    }

    /// Operand as the registration encoding renders it. Strings come through
    /// unquoted; anything else, arrays included, is its compact JSON text
    /// (`[1,2]`, not a space-separated list).
    pub fn operand_string(&self) -> String {
        match &self.operand {
            Value::String(operand) => operand.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Narrow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("-")?;
        }
        write!(f, "{}:{}", self.operator, self.operand_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NarrowParseError {
    #[error("narrow term '{0}' is not of the form [-]operator:operand")]
    MissingSeparator(String),
    #[error("narrow term '{0}' has an empty operator")]
    EmptyOperator(String),
}

impl FromStr for Narrow {
    type Err = NarrowParseError;

    /// Parse `[-]operator:operand`; the operand keeps any further `:`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let term = s.trim();
        let (negated, body) = match term.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, term),
        };
        let (operator, operand) = body
            .split_once(':')
            .ok_or_else(|| NarrowParseError::MissingSeparator(term.to_owned()))?;
        if operator.is_empty() {
            return Err(NarrowParseError::EmptyOperator(term.to_owned()));
        }

        Ok(Self {
            operator: Operator::new(operator),
            operand: Value::String(operand.to_owned()),
            negated,
        })
    }
}

/// Ordered sequence of narrow terms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NarrowFilter(Vec<Narrow>);

impl NarrowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a term and return the filter.
    pub fn with(mut self, narrow: Narrow) -> Self {
        self.0.push(narrow);
        self
    }

    pub fn push(&mut self, narrow: Narrow) {
        self.0.push(narrow);
    }

    pub fn terms(&self) -> &[Narrow] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Message-search encoding: `[{"operator":..,"operand":..,"negated":..}]`.
    pub fn to_search_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }

    /// Queue-registration encoding: `[[operator, operand]]`, negation dropped.
    pub fn to_registration_json(&self) -> Result<String, serde_json::Error> {
        let pairs: Vec<[String; 2]> = self
            .0
            .iter()
            .map(|narrow| [narrow.operator.to_string(), narrow.operand_string()])
            .collect();
        serde_json::to_string(&pairs)
    }
}

impl From<Vec<Narrow>> for NarrowFilter {
    fn from(terms: Vec<Narrow>) -> Self {
        Self(terms)
    }
}

impl FromIterator<Narrow> for NarrowFilter {
    fn from_iter<I: IntoIterator<Item = Narrow>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for NarrowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, narrow) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{narrow}")?;
        }
        Ok(())
    }
}

impl FromStr for NarrowFilter {
    type Err = NarrowParseError;

    /// Parse whitespace-separated `[-]operator:operand` terms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split_whitespace().map(str::parse::<Narrow>).collect()
    }
}
