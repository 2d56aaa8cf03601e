use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MIN_HISTORY_LIMIT: u32 = 1;
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// A history parameter as it arrives from outside: query strings only carry
/// text, gateway frames may carry either a JSON number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawParam {
    Int(i64),
    Text(String),
    /// Any other JSON value (fractions, booleans, integers past i64). Kept so
    /// the frame still parses and validation can name the field.
    Other(serde_json::Value),
}

impl fmt::Display for RawParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawParam::Int(n) => write!(f, "{}", n),
            RawParam::Text(s) => f.write_str(s),
            RawParam::Other(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for RawParam {
    fn from(n: i64) -> Self {
        RawParam::Int(n)
    }
}

impl From<&str> for RawParam {
    fn from(s: &str) -> Self {
        RawParam::Text(s.to_string())
    }
}

/// Unvalidated history-fetch parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<RawParam>,
    /// Exclusive upper bound on message `seq`; absent means the newest page.
    #[serde(default)]
    pub cursor: Option<RawParam>,
}

/// A validated page request. `limit` is always within
/// [`MIN_HISTORY_LIMIT`, `MAX_HISTORY_LIMIT`] and `cursor` is at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    pub limit: u32,
    pub cursor: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryQueryError {
    #[error("{field} must be an integer, got {value:?}")]
    NotAnInteger { field: &'static str, value: String },

    #[error("limit must be between 1 and 100, got {0}")]
    LimitOutOfRange(i64),

    #[error("cursor must be at least 1, got {0}")]
    CursorOutOfRange(i64),
}

impl HistoryQueryError {
    /// Name of the offending parameter.
    pub fn field(&self) -> &'static str {
        match self {
            Self::NotAnInteger { field, .. } => *field,
            Self::LimitOutOfRange(_) => "limit",
            Self::CursorOutOfRange(_) => "cursor",
        }
    }
}

impl HistoryQuery {
    pub fn new(limit: Option<RawParam>, cursor: Option<RawParam>) -> Self {
        Self { limit, cursor }
    }

    pub fn validate(&self) -> Result<PageRequest, HistoryQueryError> {
        self.validate_with_default(DEFAULT_HISTORY_LIMIT)
    }

    /// Coerce both parameters to integers, then range-check them. Nothing is
    /// clamped: out-of-range input is an error.
    pub fn validate_with_default(&self, default_limit: u32) -> Result<PageRequest, HistoryQueryError> {
        let limit = match &self.limit {
            Some(raw) => {
                let n = coerce("limit", raw)?;
                if n < MIN_HISTORY_LIMIT as i64 || n > MAX_HISTORY_LIMIT as i64 {
                    return Err(HistoryQueryError::LimitOutOfRange(n));
                }
                n as u32
            }
            None => default_limit.clamp(MIN_HISTORY_LIMIT, MAX_HISTORY_LIMIT),
        };

        let cursor = match &self.cursor {
            Some(raw) => {
                let n = coerce("cursor", raw)?;
                if n < 1 {
                    return Err(HistoryQueryError::CursorOutOfRange(n));
                }
                Some(n)
            }
            None => None,
        };

        Ok(PageRequest { limit, cursor })
    }
}

fn coerce(field: &'static str, raw: &RawParam) -> Result<i64, HistoryQueryError> {
    match raw {
        RawParam::Int(n) => Ok(*n),
        RawParam::Text(s) => s.trim().parse::<i64>().map_err(|_| HistoryQueryError::NotAnInteger {
            field,
            value: s.clone(),
        }),
        RawParam::Other(v) => Err(HistoryQueryError::NotAnInteger {
            field,
            value: v.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(limit: Option<&str>, cursor: Option<&str>) -> HistoryQuery {
        HistoryQuery::new(limit.map(RawParam::from), cursor.map(RawParam::from))
    }

    #[test]
    fn accepts_every_limit_in_range() {
        for n in 1..=100 {
            let req = query(Some(&n.to_string()), None).validate().unwrap();
            assert_eq!(req.limit, n);
        }
    }

    #[test]
    fn accepts_absent_or_positive_cursor() {
        assert_eq!(query(None, None).validate().unwrap().cursor, None);
        assert_eq!(query(None, Some("1")).validate().unwrap().cursor, Some(1));
        assert_eq!(
            query(Some("100"), Some("987654321")).validate().unwrap(),
            PageRequest { limit: 100, cursor: Some(987654321) }
        );
    }

    #[test]
    fn missing_limit_uses_default() {
        assert_eq!(query(None, None).validate().unwrap().limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(query(None, None).validate_with_default(20).unwrap().limit, 20);
    }

    #[test]
    fn rejects_out_of_range_limit() {
        assert_eq!(query(Some("0"), None).validate(), Err(HistoryQueryError::LimitOutOfRange(0)));
        assert_eq!(query(Some("101"), None).validate(), Err(HistoryQueryError::LimitOutOfRange(101)));
        assert_eq!(query(Some("-5"), None).validate(), Err(HistoryQueryError::LimitOutOfRange(-5)));
    }

    #[test]
    fn rejects_zero_cursor() {
        let err = query(None, Some("0")).validate().unwrap_err();
        assert_eq!(err, HistoryQueryError::CursorOutOfRange(0));
        assert_eq!(err.field(), "cursor");
    }

    #[test]
    fn rejects_non_integer_text() {
        let err = query(Some("ten"), None).validate().unwrap_err();
        assert_eq!(err.field(), "limit");
        assert!(matches!(err, HistoryQueryError::NotAnInteger { .. }));

        let err = query(None, Some("1.5")).validate().unwrap_err();
        assert_eq!(err.field(), "cursor");
    }

    #[test]
    fn json_numbers_and_strings_both_coerce() {
        let q: HistoryQuery = serde_json::from_str(r#"{"limit": 25, "cursor": "7"}"#).unwrap();
        assert_eq!(q.validate().unwrap(), PageRequest { limit: 25, cursor: Some(7) });

        let q: HistoryQuery = serde_json::from_str(r#"{"limit": "101"}"#).unwrap();
        assert_eq!(q.validate(), Err(HistoryQueryError::LimitOutOfRange(101)));
    }

    #[test]
    fn json_values_that_are_not_integers_are_rejected_by_field() {
        for raw in [r#"{"limit": 1.5}"#, r#"{"limit": true}"#, r#"{"limit": 18446744073709551615}"#] {
            let q: HistoryQuery = serde_json::from_str(raw).unwrap();
            let err = q.validate().unwrap_err();
            assert!(matches!(err, HistoryQueryError::NotAnInteger { field: "limit", .. }), "{}", raw);
        }

        let q: HistoryQuery = serde_json::from_str(r#"{"cursor": [3]}"#).unwrap();
        assert_eq!(q.validate().unwrap_err().field(), "cursor");
    }
}
