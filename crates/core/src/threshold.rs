//! Structured threshold predicates.
//!
//! Thresholds are persisted as `"<op>#<low>[,<high>]"` where `op` is one of
//! `gt`, `lt`, `bw` or empty. The text form is parsed once at load time; all
//! evaluation works on [`ThresholdRule`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing a threshold encoding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThresholdError {
    #[error("missing '#' separator in threshold '{0}'")]
    MissingSeparator(String),

    #[error("unknown threshold operator '{0}'")]
    UnknownOperator(String),

    #[error("invalid threshold value '{0}'")]
    InvalidValue(String),

    #[error("operator '{op}' takes {expected} bound(s), got '{input}'")]
    BoundCount {
        op: &'static str,
        expected: usize,
        input: String,
    },

    #[error("inverted range in threshold '{0}': low is greater than high")]
    InvertedRange(String),
}

/// Comparison operator of a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThresholdOp {
    /// Strictly greater than `low`.
    Gt,
    /// Strictly less than `low`.
    Lt,
    /// Inclusive range `low..=high`.
    Bw,
    /// No comparison; the value's meaning is fixed by the axis using it.
    None,
}

impl ThresholdOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdOp::Gt => "gt",
            ThresholdOp::Lt => "lt",
            ThresholdOp::Bw => "bw",
            ThresholdOp::None => "",
        }
    }

    fn bound_count(&self) -> usize {
        match self {
            ThresholdOp::Bw => 2,
            _ => 1,
        }
    }
}

/// A parsed threshold predicate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThresholdRule {
    op: ThresholdOp,
    low: f64,
    high: Option<f64>,
}

impl ThresholdRule {
    pub fn gt(low: f64) -> Self {
        Self {
            op: ThresholdOp::Gt,
            low,
            high: None,
        }
    }

    pub fn lt(low: f64) -> Self {
        Self {
            op: ThresholdOp::Lt,
            low,
            high: None,
        }
    }

    /// Inclusive range. Returns an error if `low > high`.
    pub fn between(low: f64, high: f64) -> Result<Self, ThresholdError> {
        if low > high {
            return Err(ThresholdError::InvertedRange(format!("bw#{},{}", low, high)));
        }
        Ok(Self {
            op: ThresholdOp::Bw,
            low,
            high: Some(high),
        })
    }

    /// A bare value (`"#720"`), interpreted by the axis that uses it.
    pub fn value(low: f64) -> Self {
        Self {
            op: ThresholdOp::None,
            low,
            high: None,
        }
    }

    pub fn op(&self) -> ThresholdOp {
        self.op
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> Option<f64> {
        self.high
    }

    /// Parse the textual encoding.
    ///
    /// Returns `Ok(None)` for an empty string or an encoding with no value
    /// after `#`, both of which mean "axis inactive".
    pub fn parse(input: &str) -> Result<Option<Self>, ThresholdError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let (op_str, values) = trimmed
            .split_once('#')
            .ok_or_else(|| ThresholdError::MissingSeparator(trimmed.to_string()))?;

        let op = match op_str.trim().to_ascii_lowercase().as_str() {
            "gt" => ThresholdOp::Gt,
            "lt" => ThresholdOp::Lt,
            "bw" => ThresholdOp::Bw,
            "" => ThresholdOp::None,
            other => return Err(ThresholdError::UnknownOperator(other.to_string())),
        };

        let values = values.trim();
        if values.is_empty() {
            return Ok(None);
        }

        let bounds = values
            .split(',')
            .map(|v| {
                let v = v.trim();
                v.parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .ok_or_else(|| ThresholdError::InvalidValue(v.to_string()))
            })
            .collect::<Result<Vec<f64>, _>>()?;

        if bounds.len() != op.bound_count() {
            return Err(ThresholdError::BoundCount {
                op: if op == ThresholdOp::None { "#" } else { op.as_str() },
                expected: op.bound_count(),
                input: trimmed.to_string(),
            });
        }

        let rule = match op {
            ThresholdOp::Bw => {
                if bounds[0] > bounds[1] {
                    return Err(ThresholdError::InvertedRange(trimmed.to_string()));
                }
                Self {
                    op,
                    low: bounds[0],
                    high: Some(bounds[1]),
                }
            }
            _ => Self {
                op,
                low: bounds[0],
                high: None,
            },
        };
        Ok(Some(rule))
    }

    /// Parse a peer-count threshold, accepting the legacy bare-number form
    /// (`"5"`) as `lt#5`.
    pub fn parse_legacy_count(input: &str) -> Result<Option<Self>, ThresholdError> {
        let trimmed = input.trim();
        if !trimmed.is_empty() && !trimmed.contains('#') {
            return Self::parse(&format!("lt#{}", trimmed));
        }
        Self::parse(trimmed)
    }

    /// Evaluate the predicate against `x`.
    ///
    /// `gt`/`lt` are strict, `bw` is inclusive on both ends. A bare value
    /// places no constraint.
    pub fn evaluate(&self, x: f64) -> bool {
        match self.op {
            ThresholdOp::Gt => x > self.low,
            ThresholdOp::Lt => x < self.low,
            ThresholdOp::Bw => {
                let high = self.high.unwrap_or(f64::INFINITY);
                self.low <= x && x <= high
            }
            ThresholdOp::None => true,
        }
    }

    /// Same as [`evaluate`](Self::evaluate) with the bounds scaled by `unit`
    /// (e.g. GiB thresholds compared against byte counts).
    pub fn evaluate_scaled(&self, x: f64, unit: f64) -> bool {
        self.scaled(unit).evaluate(x)
    }

    /// `x` is strictly above `low * unit`, regardless of operator.
    pub fn exceeds(&self, x: f64, unit: f64) -> bool {
        x > self.low * unit
    }

    /// `x` is strictly below `low * unit`, regardless of operator.
    pub fn below(&self, x: f64, unit: f64) -> bool {
        x < self.low * unit
    }

    fn scaled(&self, unit: f64) -> Self {
        Self {
            op: self.op,
            low: self.low * unit,
            high: self.high.map(|h| h * unit),
        }
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.high {
            Some(high) => write!(f, "{}#{},{}", self.op.as_str(), self.low, high),
            None => write!(f, "{}#{}", self.op.as_str(), self.low),
        }
    }
}

impl FromStr for ThresholdRule {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)?.ok_or_else(|| ThresholdError::InvalidValue(s.to_string()))
    }
}

impl TryFrom<String> for ThresholdRule {
    type Error = ThresholdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ThresholdRule> for String {
    fn from(rule: ThresholdRule) -> Self {
        rule.to_string()
    }
}

/// Serde helper for optional threshold fields where `""` means inactive.
pub mod optional {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::ThresholdRule;

    pub fn serialize<S>(value: &Option<ThresholdRule>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(rule) => serializer.serialize_str(&rule.to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<ThresholdRule>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(text) => ThresholdRule::parse(&text).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Like [`optional`], but a bare number is read as `lt#<n>`.
pub mod optional_count {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::ThresholdRule;

    pub fn serialize<S>(value: &Option<ThresholdRule>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::optional::serialize(value, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<ThresholdRule>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(text) => ThresholdRule::parse_legacy_count(&text).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_is_inactive() {
        assert_eq!(ThresholdRule::parse("").unwrap(), None);
        assert_eq!(ThresholdRule::parse("   ").unwrap(), None);
        assert_eq!(ThresholdRule::parse("gt#").unwrap(), None);
    }

    #[test]
    fn test_parse_operators() {
        let gt = ThresholdRule::parse("gt#5").unwrap().unwrap();
        assert_eq!(gt.op(), ThresholdOp::Gt);
        assert_eq!(gt.low(), 5.0);
        assert_eq!(gt.high(), None);

        let bw = ThresholdRule::parse("bw#1,4").unwrap().unwrap();
        assert_eq!(bw.op(), ThresholdOp::Bw);
        assert_eq!(bw.low(), 1.0);
        assert_eq!(bw.high(), Some(4.0));

        let bare = ThresholdRule::parse("#720").unwrap().unwrap();
        assert_eq!(bare.op(), ThresholdOp::None);
        assert_eq!(bare.low(), 720.0);
    }

    #[test]
    fn test_parse_rejects_bad_bounds() {
        assert!(matches!(
            ThresholdRule::parse("bw#1"),
            Err(ThresholdError::BoundCount { .. })
        ));
        assert!(matches!(
            ThresholdRule::parse("gt#1,2"),
            Err(ThresholdError::BoundCount { .. })
        ));
        assert!(matches!(
            ThresholdRule::parse("bw#5,1"),
            Err(ThresholdError::InvertedRange(_))
        ));
        assert!(matches!(
            ThresholdRule::parse("eq#5"),
            Err(ThresholdError::UnknownOperator(_))
        ));
        assert!(matches!(
            ThresholdRule::parse("gt#abc"),
            Err(ThresholdError::InvalidValue(_))
        ));
        assert!(matches!(
            ThresholdRule::parse("720"),
            Err(ThresholdError::MissingSeparator(_))
        ));
    }

    #[test]
    fn test_between_boundaries_inclusive() {
        let rule = ThresholdRule::between(1.0, 4.0).unwrap();
        assert!(rule.evaluate(1.0));
        assert!(rule.evaluate(4.0));
        assert!(rule.evaluate(2.5));
        assert!(!rule.evaluate(0.999));
        assert!(!rule.evaluate(4.001));
    }

    #[test]
    fn test_one_sided_strict() {
        let gt = ThresholdRule::gt(10.0);
        assert!(!gt.evaluate(10.0));
        assert!(gt.evaluate(10.5));

        let lt = ThresholdRule::lt(10.0);
        assert!(!lt.evaluate(10.0));
        assert!(lt.evaluate(9.5));
    }

    #[test]
    fn test_scaled_gib() {
        let gib = 1024.0_f64.powi(3);
        let rule = ThresholdRule::parse("bw#1,4").unwrap().unwrap();
        assert!(rule.evaluate_scaled(3.0 * gib, gib));
        assert!(!rule.evaluate_scaled(5.0 * gib, gib));
    }

    #[test]
    fn test_display_round_trip() {
        for text in ["gt#5", "lt#0.5", "bw#1,4", "#720", "bw#1.5,2.25"] {
            let rule = ThresholdRule::parse(text).unwrap().unwrap();
            assert_eq!(rule.to_string(), text);
            assert_eq!(ThresholdRule::parse(&rule.to_string()).unwrap(), Some(rule));
        }
    }

    #[test]
    fn test_legacy_peer_count() {
        let rule = ThresholdRule::parse_legacy_count("5").unwrap().unwrap();
        assert_eq!(rule, ThresholdRule::lt(5.0));
        let rule = ThresholdRule::parse_legacy_count("gt#3").unwrap().unwrap();
        assert_eq!(rule, ThresholdRule::gt(3.0));
    }

    #[test]
    fn test_exceeds_and_below_ignore_operator() {
        let rule = ThresholdRule::value(720.0);
        assert!(rule.exceeds(721.0 * 3600.0, 3600.0));
        assert!(!rule.exceeds(720.0 * 3600.0, 3600.0));
        assert!(rule.below(100.0, 1.0));
    }

    #[test]
    fn test_serde_string_form() {
        #[derive(Debug, Serialize, Deserialize)]
        struct Holder {
            #[serde(default, with = "optional")]
            size: Option<ThresholdRule>,
        }

        let parsed: Holder = toml::from_str(r#"size = "bw#1,4""#).unwrap();
        assert_eq!(parsed.size, Some(ThresholdRule::between(1.0, 4.0).unwrap()));

        let empty: Holder = toml::from_str(r#"size = """#).unwrap();
        assert_eq!(empty.size, None);

        let missing: Holder = toml::from_str("").unwrap();
        assert_eq!(missing.size, None);

        assert!(toml::from_str::<Holder>(r#"size = "bw#4,1""#).is_err());
    }
}
