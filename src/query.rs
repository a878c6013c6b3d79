use crate::error::{Error, Result};
use crate::value::Value;
use serde::Serialize;

/// A filter condition on one attribute.
///
/// `Equal` is what a bare literal means; the rest mirror the operator-keyed
/// conditions accepted by [`Predicate::from_operator`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Predicate {
    Equal(Value),
    NotEqual(Value),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    LessThan(Value),
    LessThanOrEqual(Value),
    Like(String),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    /// Passed through verbatim to the backend; the attribute name is ignored.
    Raw(String),
}

impl Predicate {
    /// Build a condition from its operator spelling: `like`, `<`, `<=`, `>`,
    /// `>=`, `!=`, `in`, `not in`, `raw`, or `=`.
    pub fn from_operator(operator: &str, value: Value) -> Result<Self> {
        let predicate = match operator {
            "=" => Predicate::Equal(value),
            "!=" => Predicate::NotEqual(value),
            ">" => Predicate::GreaterThan(value),
            ">=" => Predicate::GreaterThanOrEqual(value),
            "<" => Predicate::LessThan(value),
            "<=" => Predicate::LessThanOrEqual(value),
            "like" => Predicate::Like(text_operand(operator, value)?),
            "raw" => Predicate::Raw(text_operand(operator, value)?),
            "in" | "not in" => {
                let Value::List(items) = value else {
                    return Err(Error::InvalidArgument("'in' requires an array".to_string()));
                };
                if operator == "in" {
                    Predicate::In(items)
                } else {
                    Predicate::NotIn(items)
                }
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "Unsupported where type {}",
                    other
                )))
            }
        };
        Ok(predicate)
    }

    /// SQL-ish operator spelling, used in messages and by backends.
    pub fn operator(&self) -> &'static str {
        match self {
            Predicate::Equal(_) => "=",
            Predicate::NotEqual(_) => "!=",
            Predicate::GreaterThan(_) => ">",
            Predicate::GreaterThanOrEqual(_) => ">=",
            Predicate::LessThan(_) => "<",
            Predicate::LessThanOrEqual(_) => "<=",
            Predicate::Like(_) => "like",
            Predicate::In(_) => "in",
            Predicate::NotIn(_) => "not in",
            Predicate::Raw(_) => "raw",
        }
    }

    /// Apply `f` to every scalar operand.
    pub(crate) fn try_map_values<F>(self, mut f: F) -> Result<Self>
    where
        F: FnMut(Value) -> Result<Value>,
    {
        Ok(match self {
            Predicate::Equal(v) => Predicate::Equal(f(v)?),
            Predicate::NotEqual(v) => Predicate::NotEqual(f(v)?),
            Predicate::GreaterThan(v) => Predicate::GreaterThan(f(v)?),
            Predicate::GreaterThanOrEqual(v) => Predicate::GreaterThanOrEqual(f(v)?),
            Predicate::LessThan(v) => Predicate::LessThan(f(v)?),
            Predicate::LessThanOrEqual(v) => Predicate::LessThanOrEqual(f(v)?),
            Predicate::In(items) => Predicate::In(items.into_iter().map(&mut f).collect::<Result<_>>()?),
            Predicate::NotIn(items) => {
                Predicate::NotIn(items.into_iter().map(&mut f).collect::<Result<_>>()?)
            }
            other @ (Predicate::Like(_) | Predicate::Raw(_)) => other,
        })
    }
}

fn text_operand(operator: &str, value: Value) -> Result<String> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(Error::InvalidArgument(format!(
            "'{}' requires a text operand, got {:?}",
            operator, other
        ))),
    }
}

/// An ordered batch of filter changes for [`crate::Cursor::filter`].
///
/// Each entry sets a predicate or, with [`Filters::unset`], removes one that
/// an earlier call put on the cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    entries: Vec<(String, Option<Predicate>)>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality on a literal.
    pub fn eq(self, attribute: &str, value: impl Into<Value>) -> Self {
        self.with_condition(attribute, Predicate::Equal(value.into()))
    }

    pub fn with_condition(mut self, attribute: &str, predicate: Predicate) -> Self {
        self.entries.push((attribute.to_string(), Some(predicate)));
        self
    }

    /// Remove a previously set filter.
    pub fn unset(mut self, attribute: &str) -> Self {
        self.entries.push((attribute.to_string(), None));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, Option<Predicate>)> {
        self.entries
    }
}

/// Collects equality filters on literals.
impl<K, V> FromIterator<(K, V)> for Filters
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), Some(Predicate::Equal(v.into()))))
                .collect(),
        }
    }
}
