//! Conditions: one range or equality test over a tagged numeric feature.
//!
//! A condition names a feature by `(category, selector)`, asks the item for
//! that value through [`FeatureSource`], and tests membership:
//!
//! ```text
//! Condition  ::= (category, selector) Test
//! Test       ::= [lower, upper)                       single range
//!              | [lower, upper) | [lower2, upper2)    either of two ranges
//!              | == value                             equality
//! ```

use serde::{Deserialize, Serialize};

use cascade_types::{CascadeError, Result};

/// Which table of an item a selector indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    /// Event-level aggregate table (multiplicity, centrality, ...).
    Global,
    /// Particle kinematics, see [`crate::event::kinematic`].
    Kinematic,
    Charge,
    /// PDG species code.
    Species,
}

impl std::fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FeatureCategory::Global => "global",
            FeatureCategory::Kinematic => "kinematic",
            FeatureCategory::Charge => "charge",
            FeatureCategory::Species => "species",
        };
        f.write_str(name)
    }
}

/// Anything a [`Condition`] can be evaluated against.
///
/// Implementors must return [`CascadeError::FeatureOutOfRange`] for a
/// selector they do not hold; zero-filling a missing slot would silently
/// corrupt every statistic gated by the filter.
pub trait FeatureSource {
    fn feature(&self, category: FeatureCategory, selector: usize) -> Result<f64>;
}

/// Half-open interval `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

impl Interval {
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(CascadeError::Validation(format!(
                "invalid interval [{lower}, {upper})"
            )));
        }
        Ok(Self { lower, upper })
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value < self.upper
    }
}

/// The membership test applied to the extracted value.
#[derive(Debug, Clone, PartialEq)]
pub enum Test {
    Within(Interval),
    WithinEither(Interval, Interval),
    Equals(f64),
}

impl Test {
    pub fn passes(&self, value: f64) -> bool {
        match self {
            Test::Within(r) => r.contains(value),
            Test::WithinEither(a, b) => a.contains(value) || b.contains(value),
            Test::Equals(expected) => value == *expected,
        }
    }
}

/// One test over one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConditionSpec", into = "ConditionSpec")]
pub struct Condition {
    category: FeatureCategory,
    selector: usize,
    test: Test,
}

impl Condition {
    pub fn range(category: FeatureCategory, selector: usize, lower: f64, upper: f64) -> Result<Self> {
        Ok(Self {
            category,
            selector,
            test: Test::Within(Interval::new(lower, upper)?),
        })
    }

    pub fn dual_range(
        category: FeatureCategory,
        selector: usize,
        (lower, upper): (f64, f64),
        (lower2, upper2): (f64, f64),
    ) -> Result<Self> {
        Ok(Self {
            category,
            selector,
            test: Test::WithinEither(Interval::new(lower, upper)?, Interval::new(lower2, upper2)?),
        })
    }

    pub fn equals(category: FeatureCategory, selector: usize, value: f64) -> Result<Self> {
        if value.is_nan() {
            return Err(CascadeError::Validation(
                "equality condition against NaN never matches".into(),
            ));
        }
        Ok(Self {
            category,
            selector,
            test: Test::Equals(value),
        })
    }

    pub fn category(&self) -> FeatureCategory {
        self.category
    }

    pub fn selector(&self) -> usize {
        self.selector
    }

    pub fn test(&self) -> &Test {
        &self.test
    }

    /// Extract the feature from `item` and test it.
    pub fn accept<S: FeatureSource + ?Sized>(&self, item: &S) -> Result<bool> {
        let value = item.feature(self.category, self.selector)?;
        Ok(self.test.passes(value))
    }

    /// Compact form used in logs and result names, e.g. `kinematic[0]∈[0.2,2)`.
    pub fn describe(&self) -> String {
        let feature = format!("{}[{}]", self.category, self.selector);
        match &self.test {
            Test::Within(r) => format!("{feature}∈[{},{})", r.lower, r.upper),
            Test::WithinEither(a, b) => format!(
                "{feature}∈[{},{})∪[{},{})",
                a.lower, a.upper, b.lower, b.upper
            ),
            Test::Equals(v) => format!("{feature}=={v}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire form
// ---------------------------------------------------------------------------

/// Flat serialised form used in run files:
/// `{"category": "kinematic", "selector": 0, "lower": 0.2, "upper": 2.0}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConditionSpec {
    category: FeatureCategory,
    #[serde(default)]
    selector: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    upper: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lower2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    upper2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    equals: Option<f64>,
}

impl TryFrom<ConditionSpec> for Condition {
    type Error = CascadeError;

    fn try_from(spec: ConditionSpec) -> Result<Self> {
        let ConditionSpec {
            category,
            selector,
            lower,
            upper,
            lower2,
            upper2,
            equals,
        } = spec;
        match (equals, lower, upper, lower2, upper2) {
            (Some(v), None, None, None, None) => Condition::equals(category, selector, v),
            (None, Some(lo), Some(hi), None, None) => Condition::range(category, selector, lo, hi),
            (None, Some(lo), Some(hi), Some(lo2), Some(hi2)) => {
                Condition::dual_range(category, selector, (lo, hi), (lo2, hi2))
            }
            _ => Err(CascadeError::Validation(format!(
                "condition on {category}[{selector}] needs either `equals` or `lower`/`upper` \
                 (optionally `lower2`/`upper2`)"
            ))),
        }
    }
}

impl From<Condition> for ConditionSpec {
    fn from(c: Condition) -> Self {
        let mut spec = ConditionSpec {
            category: c.category,
            selector: c.selector,
            lower: None,
            upper: None,
            lower2: None,
            upper2: None,
            equals: None,
        };
        match c.test {
            Test::Within(r) => {
                spec.lower = Some(r.lower);
                spec.upper = Some(r.upper);
            }
            Test::WithinEither(a, b) => {
                spec.lower = Some(a.lower);
                spec.upper = Some(a.upper);
                spec.lower2 = Some(b.lower);
                spec.upper2 = Some(b.upper);
            }
            Test::Equals(v) => spec.equals = Some(v),
        }
        spec
    }
}
