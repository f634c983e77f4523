//! Where-clause predicates.

use crate::error::{CoreError, CoreResult};
use crate::types::RecordId;
use crate::value::{Record, Value, ID_FIELD};
use regex::Regex;
use std::fmt;

/// A `$like` pattern: `%` matches any run of characters, everything else
/// matches literally, and the whole field must match.
#[derive(Clone)]
pub struct LikePattern {
    pattern: String,
    regex: Regex,
}

impl LikePattern {
    /// Compiles a pattern.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the translated expression is rejected.
    pub fn new(pattern: &str) -> CoreResult<Self> {
        let translated = regex::escape(pattern).replace('%', ".*");
        let regex = Regex::new(&format!("(?s)^{translated}$"))
            .map_err(|e| CoreError::validation(format!("bad $like pattern {pattern:?}: {e}")))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Returns the pattern as written.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns true if `text` matches.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for LikePattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for LikePattern {}

impl fmt::Debug for LikePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LikePattern").field(&self.pattern).finish()
    }
}

/// A test applied to one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `$eq`, or a bare literal.
    Eq(Value),
    /// `$ne`
    Ne(Value),
    /// `$gt`: only values of the same type compare.
    Gt(Value),
    /// `$lt`: only values of the same type compare.
    Lt(Value),
    /// `$in`
    In(Vec<Value>),
    /// `$like`: text fields only.
    Like(LikePattern),
}

impl Condition {
    /// Returns true if `value` satisfies the condition.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Eq(expected) => value == expected,
            Self::Ne(expected) => value != expected,
            Self::Gt(bound) => value.same_type(bound) && value > bound,
            Self::Lt(bound) => value.same_type(bound) && value < bound,
            Self::In(options) => options.contains(value),
            Self::Like(pattern) => value.as_text().is_some_and(|text| pattern.matches(text)),
        }
    }
}

/// One field test inside a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// Field name. A missing field reads as `Null`.
    pub field: String,
    /// The test.
    pub condition: Condition,
}

/// A conjunction of field conditions.
///
/// ```rust
/// use glyphdb_core::{Predicate, Record};
///
/// let adults = Predicate::new().gt("age", 17).ne("banned", true);
/// assert!(adults.matches(&Record::new().with("age", 30)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    /// Creates a predicate matching every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches the record with the given id.
    #[must_use]
    pub fn id(id: RecordId) -> Self {
        Self::new().eq(ID_FIELD, id)
    }

    fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.clauses.push(Clause {
            field: field.into(),
            condition,
        });
        self
    }

    /// Adds `field == value`.
    #[must_use]
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Eq(value.into()))
    }

    /// Adds `field != value`.
    #[must_use]
    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Ne(value.into()))
    }

    /// Adds `field > value`.
    #[must_use]
    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Gt(value.into()))
    }

    /// Adds `field < value`.
    #[must_use]
    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Lt(value.into()))
    }

    /// Adds `field in values`.
    #[must_use]
    pub fn is_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.with(
            field,
            Condition::In(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Adds `field like pattern`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the pattern cannot be compiled.
    pub fn like(self, field: impl Into<String>, pattern: &str) -> CoreResult<Self> {
        Ok(self.with(field, Condition::Like(LikePattern::new(pattern)?)))
    }

    /// Returns the conjunction of both predicates.
    #[must_use]
    pub fn and(mut self, other: Self) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    /// Returns the clauses.
    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Returns true if the predicate has no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Returns true if every clause holds for `record`.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.clauses
            .iter()
            .all(|c| c.condition.matches(record.get_or_null(&c.field)))
    }

    /// Returns `(field, value)` if this is exactly one equality clause.
    #[must_use]
    pub fn single_equality(&self) -> Option<(&str, &Value)> {
        match self.clauses.as_slice() {
            [Clause {
                field,
                condition: Condition::Eq(value),
            }] => Some((field, value)),
            _ => None,
        }
    }

    /// Parses a JSON where-object.
    ///
    /// Each key maps a field to a literal (equality) or to an operator
    /// object using `$eq $ne $gt $lt $in $like`. Several operators in one
    /// object are conjunctive.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a non-object, an unknown or empty
    /// operator object, `$in` without an array, `$like` without a string,
    /// or a non-integer number.
    pub fn from_json(json: &serde_json::Value) -> CoreResult<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| CoreError::validation("where clause must be a JSON object"))?;

        let mut predicate = Self::new();
        for (field, spec) in object {
            let Some(operators) = spec.as_object() else {
                predicate = predicate.eq(field.as_str(), Value::try_from(spec.clone())?);
                continue;
            };
            if operators.is_empty() {
                return Err(CoreError::validation(format!(
                    "empty operator object for field {field}"
                )));
            }
            for (op, operand) in operators {
                let literal = || Value::try_from(operand.clone());
                predicate = match op.as_str() {
                    "$eq" => predicate.eq(field.as_str(), literal()?),
                    "$ne" => predicate.ne(field.as_str(), literal()?),
                    "$gt" => predicate.gt(field.as_str(), literal()?),
                    "$lt" => predicate.lt(field.as_str(), literal()?),
                    "$in" => {
                        let items = operand.as_array().ok_or_else(|| {
                            CoreError::validation(format!("$in on {field} needs an array"))
                        })?;
                        let values = items
                            .iter()
                            .cloned()
                            .map(Value::try_from)
                            .collect::<CoreResult<Vec<_>>>()?;
                        predicate.is_in(field.as_str(), values)
                    }
                    "$like" => {
                        let pattern = operand.as_str().ok_or_else(|| {
                            CoreError::validation(format!("$like on {field} needs a string"))
                        })?;
                        predicate.like(field.as_str(), pattern)?
                    }
                    other => {
                        return Err(CoreError::validation(format!(
                            "unknown operator {other} on field {field}"
                        )))
                    }
                };
            }
        }
        Ok(predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;

    fn person(name: &str, age: i64) -> Record {
        Record::new().with("name", name).with("age", age)
    }

    #[test]
    fn operators() {
        let ada = person("Ada", 36);
        assert!(Predicate::new().eq("name", "Ada").matches(&ada));
        assert!(Predicate::new().ne("name", "Bob").matches(&ada));
        assert!(Predicate::new().gt("age", 30).lt("age", 40).matches(&ada));
        assert!(Predicate::new().is_in("age", [1, 36]).matches(&ada));
        assert!(!Predicate::new().is_in("age", [1, 2]).matches(&ada));
    }

    #[test]
    fn comparisons_ignore_other_types() {
        let ada = person("Ada", 36);
        assert!(!Predicate::new().gt("name", 1).matches(&ada));
        assert!(!Predicate::new().lt("age", "zzz").matches(&ada));
    }

    #[test]
    fn like_is_full_string_with_percent_wildcards() {
        let p = Predicate::new().like("name", "A%a").unwrap();
        assert!(p.matches(&person("Ada", 1)));
        assert!(p.matches(&person("Aa", 1)));
        assert!(!p.matches(&person("Adam", 1)));

        let dots = Predicate::new().like("name", "a.c").unwrap();
        assert!(dots.matches(&person("a.c", 1)));
        assert!(!dots.matches(&person("abc", 1)));

        let numeric = Predicate::new().like("age", "%").unwrap();
        assert!(!numeric.matches(&person("x", 1)));
    }

    #[test]
    fn missing_field_is_null() {
        let p = Predicate::new().eq("nickname", Value::Null);
        assert!(p.matches(&person("Ada", 1)));
    }

    #[test]
    fn from_json_mixes_literals_and_operators() {
        let p = Predicate::from_json(&json!({
            "name": "Ada",
            "age": {"$gt": 30, "$lt": 40},
            "team": {"$in": ["red", "blue"]}
        }))
        .unwrap();
        assert_eq!(p.clauses().len(), 4);
        assert!(p.matches(&person("Ada", 36).with("team", "red")));
        assert!(!p.matches(&person("Ada", 36).with("team", "green")));
    }

    #[test]
    fn from_json_rejects_bad_input() {
        for bad in [
            json!([1]),
            json!({"a": {"$regex": "x"}}),
            json!({"a": {}}),
            json!({"a": {"$in": 3}}),
            json!({"a": {"$like": 3}}),
            json!({"a": 1.5}),
        ] {
            let err = Predicate::from_json(&bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "input: {bad}");
        }
    }

    #[test]
    fn single_equality_detection() {
        assert!(Predicate::new().eq("a", 1).single_equality().is_some());
        assert!(Predicate::new().eq("a", 1).eq("b", 2).single_equality().is_none());
        assert!(Predicate::new().gt("a", 1).single_equality().is_none());
    }
}
