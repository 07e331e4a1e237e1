//! Metadata filters.
//!
//! A [`Filter`] is a conjunction of clauses over chunk metadata. Every clause
//! must hold for a chunk to be eligible; a clause naming a field the chunk
//! does not carry never holds.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::RetrievalError;
use crate::types::{Metadata, MetadataValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Clause {
    Eq {
        field: String,
        value: MetadataValue,
    },
    /// Inclusive on both ends; at least one bound is required.
    Range {
        field: String,
        #[serde(default)]
        min: Option<MetadataValue>,
        #[serde(default)]
        max: Option<MetadataValue>,
    },
    In {
        field: String,
        values: Vec<MetadataValue>,
    },
}

impl Clause {
    pub fn field(&self) -> &str {
        match self {
            Self::Eq { field, .. } | Self::Range { field, .. } | Self::In { field, .. } => field,
        }
    }

    fn matches(&self, metadata: &Metadata) -> bool {
        let Some(actual) = metadata.get(self.field()) else {
            return false;
        };
        match self {
            Self::Eq { value, .. } => values_equal(actual, value),
            Self::In { values, .. } => values.iter().any(|v| values_equal(actual, v)),
            Self::Range { min, max, .. } => {
                let above = min
                    .as_ref()
                    .map_or(true, |m| matches!(compare(actual, m), Some(Ordering::Greater | Ordering::Equal)));
                let below = max
                    .as_ref()
                    .map_or(true, |m| matches!(compare(actual, m), Some(Ordering::Less | Ordering::Equal)));
                above && below
            }
        }
    }

    fn validate(&self) -> Result<(), RetrievalError> {
        if self.field().trim().is_empty() {
            return Err(RetrievalError::invalid_query("filter field name is empty"));
        }
        let check_value = |v: &MetadataValue| match v {
            MetadataValue::Float(f) if f.is_nan() => Err(RetrievalError::invalid_query(format!(
                "filter on {} compares against NaN",
                self.field()
            ))),
            _ => Ok(()),
        };
        match self {
            Self::Eq { value, .. } => check_value(value),
            Self::In { values, .. } => {
                if values.is_empty() {
                    return Err(RetrievalError::invalid_query(format!(
                        "set filter on {} has no members",
                        self.field()
                    )));
                }
                values.iter().try_for_each(check_value)
            }
            Self::Range { field, min, max } => {
                if min.is_none() && max.is_none() {
                    return Err(RetrievalError::invalid_query(format!("range filter on {field} has no bounds")));
                }
                for bound in min.iter().chain(max.iter()) {
                    check_value(bound)?;
                    if matches!(bound, MetadataValue::Bool(_)) {
                        return Err(RetrievalError::invalid_query(format!(
                            "range filter on {field} cannot use a boolean bound"
                        )));
                    }
                }
                if let (Some(lo), Some(hi)) = (min, max) {
                    match compare(lo, hi) {
                        None => {
                            return Err(RetrievalError::invalid_query(format!(
                                "range filter on {field} mixes incomparable bounds"
                            )))
                        }
                        Some(Ordering::Greater) => {
                            return Err(RetrievalError::invalid_query(format!(
                                "range filter on {field} has min greater than max"
                            )))
                        }
                        _ => {}
                    }
                }
                Ok(())
            }
        }
    }

    fn canonical(&self) -> String {
        let field = quote(self.field());
        match self {
            Self::Eq { value, .. } => format!("eq:{field}={}", encode_value(value)),
            Self::Range { min, max, .. } => format!(
                "range:{field}=[{},{}]",
                min.as_ref().map_or_else(|| "*".to_string(), encode_value),
                max.as_ref().map_or_else(|| "*".to_string(), encode_value)
            ),
            Self::In { values, .. } => {
                let mut members: Vec<String> = values.iter().map(encode_value).collect();
                members.sort();
                members.dedup();
                format!("in:{field}={{{}}}", members.join(","))
            }
        }
    }
}

/// Conjunction of clauses. The empty filter admits every chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn equals(mut self, field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.clauses.push(Clause::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn between(
        mut self,
        field: impl Into<String>,
        min: Option<MetadataValue>,
        max: Option<MetadataValue>,
    ) -> Self {
        self.clauses.push(Clause::Range {
            field: field.into(),
            min,
            max,
        });
        self
    }

    #[must_use]
    pub fn any_of<V: Into<MetadataValue>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.clauses.push(Clause::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.clauses.iter().all(|c| c.matches(metadata))
    }

    pub fn validate(&self) -> Result<(), RetrievalError> {
        self.clauses.iter().try_for_each(Clause::validate)
    }

    /// Stable textual form: clause order and set member order do not matter.
    pub fn canonical(&self) -> String {
        let mut parts: Vec<String> = self.clauses.iter().map(Clause::canonical).collect();
        parts.sort();
        parts.dedup();
        parts.join("&")
    }
}

fn values_equal(a: &MetadataValue, b: &MetadataValue) -> bool {
    match (a, b) {
        (MetadataValue::Bool(x), MetadataValue::Bool(y)) => x == y,
        (MetadataValue::Text(x), MetadataValue::Text(y)) => x == y,
        _ => compare(a, b) == Some(Ordering::Equal),
    }
}

#[allow(clippy::cast_precision_loss)]
fn compare(a: &MetadataValue, b: &MetadataValue) -> Option<Ordering> {
    use MetadataValue::{Float, Int, Text};
    match (a, b) {
        (Int(x), Int(y)) => Some(x.cmp(y)),
        (Int(x), Float(y)) => (*x as f64).partial_cmp(y),
        (Float(x), Int(y)) => x.partial_cmp(&(*y as f64)),
        (Float(x), Float(y)) => x.partial_cmp(y),
        (Text(x), Text(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| s.to_string())
}

fn encode_value(v: &MetadataValue) -> String {
    match v {
        MetadataValue::Bool(b) => format!("b:{b}"),
        MetadataValue::Int(i) => format!("i:{i}"),
        MetadataValue::Float(f) => format!("f:{f:?}"),
        MetadataValue::Text(s) => format!("s:{}", quote(s)),
    }
}
