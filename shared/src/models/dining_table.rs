//! Dining Table Model

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Dining table primary key
pub type TableId = i64;

/// Columns selected whenever a table row is read (桌台查询字段)
pub const TABLE_COLUMNS: &str = "id,code,name,description,needs_attention";

/// Dining table entity (桌台)
///
/// `needs_attention` is the only column the table client ever writes;
/// the other fields are maintained by staff tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    pub id: TableId,
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub needs_attention: bool,
}

impl TableRecord {
    pub fn new(id: TableId, code: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
            name: None,
            description: None,
            needs_attention: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_attention(mut self, needs_attention: bool) -> Self {
        self.needs_attention = needs_attention;
        self
    }

    /// Merge a pushed change into this record.
    ///
    /// Returns the previous `needs_attention` value. Changes for another
    /// table are the caller's problem; `id` is never overwritten.
    pub fn apply(&mut self, change: &TableChange) -> bool {
        let previous = self.needs_attention;
        if let Some(code) = &change.code {
            self.code = code.clone();
        }
        if change.full_row {
            // 整行推送: 空值即清除
            self.name = change.name.clone();
            self.description = change.description.clone();
        } else {
            if let Some(name) = &change.name {
                self.name = Some(name.clone());
            }
            if let Some(description) = &change.description {
                self.description = Some(description.clone());
            }
        }
        self.needs_attention = change.needs_attention;
        previous
    }

    /// Whether this record matches the given key
    pub fn matches(&self, key: &TableKey) -> bool {
        match key {
            TableKey::Id(id) => self.id == *id,
            TableKey::Code(code) => self.code == *code,
        }
    }
}

/// Row update pushed by the change feed
///
/// Only `id` and `needs_attention` are guaranteed. With `full_row` set
/// every column is authoritative and a missing `name`/`description` means
/// the column is null; otherwise missing columns are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChange {
    pub id: TableId,
    pub needs_attention: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub full_row: bool,
}

impl TableChange {
    /// Attention-only change
    pub fn attention(id: TableId, needs_attention: bool) -> Self {
        Self {
            id,
            needs_attention,
            code: None,
            name: None,
            description: None,
            full_row: false,
        }
    }
}

impl From<&TableRecord> for TableChange {
    fn from(record: &TableRecord) -> Self {
        Self {
            id: record.id,
            needs_attention: record.needs_attention,
            code: Some(record.code.clone()),
            name: record.name.clone(),
            description: record.description.clone(),
            full_row: true,
        }
    }
}

/// Update dining table attention payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TableAttentionUpdate {
    pub needs_attention: bool,
}

/// Table identifier parse error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableKeyError {
    #[error("invalid table id: {0:?}")]
    InvalidId(String),

    #[error("invalid table code: {0:?}")]
    InvalidCode(String),

    #[error("no table identifier in location")]
    Missing,
}

/// How a page addresses its table
///
/// Deployments embed either the numeric primary key in the page path
/// (`/mesa/12`) or a short code in the query string (`?code=A1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum TableKey {
    Id(TableId),
    Code(String),
}

/// Query parameters accepted as a table code
const CODE_PARAMS: [&str; 3] = ["code", "table", "mesa"];

const MAX_CODE_LEN: usize = 32;

impl TableKey {
    /// Parse a path segment holding a numeric table id
    pub fn from_path_segment(segment: &str) -> Result<Self, TableKeyError> {
        let trimmed = segment.trim();
        match trimmed.parse::<TableId>() {
            Ok(id) if id > 0 => Ok(TableKey::Id(id)),
            _ => Err(TableKeyError::InvalidId(trimmed.to_string())),
        }
    }

    /// Build a code key, rejecting empty or oversized codes
    pub fn code(code: &str) -> Result<Self, TableKeyError> {
        let trimmed = code.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= MAX_CODE_LEN
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(TableKey::Code(trimmed.to_string()))
        } else {
            Err(TableKeyError::InvalidCode(trimmed.to_string()))
        }
    }

    /// Read the table code from a query string
    ///
    /// Returns `Ok(None)` when no code parameter is present.
    pub fn from_query(query: &str) -> Result<Option<Self>, TableKeyError> {
        let query = query.strip_prefix('?').unwrap_or(query);
        for pair in query.split('&') {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            if CODE_PARAMS.contains(&name) {
                let value = value.replace('+', " ");
                if value.trim().is_empty() {
                    continue;
                }
                return Self::code(&value).map(Some);
            }
        }
        Ok(None)
    }

    /// Resolve the key from a page location
    ///
    /// A trailing path segment wins over the query string. A trailing
    /// segment that is present but not a valid id is an error, not a
    /// fallthrough.
    pub fn from_location(path: &str, query: Option<&str>) -> Result<Self, TableKeyError> {
        let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
        let has_table_segment = path
            .trim_end_matches('/')
            .rsplit('/')
            .nth(1)
            .is_some_and(|parent| matches!(parent, "table" | "tables" | "mesa"));

        if has_table_segment {
            return Self::from_path_segment(last);
        }
        if let Ok(key) = Self::from_path_segment(last) {
            return Ok(key);
        }
        match query {
            Some(q) => Self::from_query(q)?.ok_or(TableKeyError::Missing),
            None => Err(TableKeyError::Missing),
        }
    }

    /// PostgREST-style filter for this key (`id=eq.12`, `code=eq.A1`)
    pub fn filter(&self) -> String {
        match self {
            TableKey::Id(id) => format!("id=eq.{}", id),
            TableKey::Code(code) => format!("code=eq.{}", code),
        }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKey::Id(id) => write!(f, "#{}", id),
            TableKey::Code(code) => write!(f, "code {}", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_segment() {
        assert_eq!(TableKey::from_path_segment("12"), Ok(TableKey::Id(12)));
        assert!(matches!(
            TableKey::from_path_segment("abc"),
            Err(TableKeyError::InvalidId(_))
        ));
        assert!(TableKey::from_path_segment("0").is_err());
        assert!(TableKey::from_path_segment("").is_err());
    }

    #[test]
    fn test_query_code() {
        assert_eq!(
            TableKey::from_query("?code=A1&lang=es").unwrap(),
            Some(TableKey::Code("A1".into()))
        );
        assert_eq!(
            TableKey::from_query("mesa=terraza-3").unwrap(),
            Some(TableKey::Code("terraza-3".into()))
        );
        assert_eq!(TableKey::from_query("lang=es").unwrap(), None);
        assert_eq!(TableKey::from_query("code=").unwrap(), None);
        assert_eq!(
            TableKey::from_query("code=&mesa=A1").unwrap(),
            Some(TableKey::Code("A1".into()))
        );
        assert!(TableKey::from_query("code=a%20b").is_err());
    }

    #[test]
    fn test_location() {
        assert_eq!(
            TableKey::from_location("/mesa/7", None),
            Ok(TableKey::Id(7))
        );
        assert!(matches!(
            TableKey::from_location("/mesa/siete", Some("code=A1")),
            Err(TableKeyError::InvalidId(_))
        ));
        assert_eq!(
            TableKey::from_location("/", Some("code=A1")),
            Ok(TableKey::Code("A1".into()))
        );
        assert_eq!(
            TableKey::from_location("/", None),
            Err(TableKeyError::Missing)
        );
    }

    #[test]
    fn test_apply_change_returns_previous_flag() {
        let mut record = TableRecord::new(3, "T3").with_attention(true);
        let mut change = TableChange::attention(3, false);
        change.name = Some("Ventana".into());

        let previous = record.apply(&change);
        assert!(previous);
        assert!(!record.needs_attention);
        assert_eq!(record.name.as_deref(), Some("Ventana"));
        assert_eq!(record.code, "T3");
    }

    #[test]
    fn test_full_row_change_clears_columns() {
        let mut record = TableRecord::new(5, "5")
            .with_name("Barra")
            .with_description("Junto a la ventana");

        // Partial change keeps the columns it does not carry
        record.apply(&TableChange::attention(5, true));
        assert_eq!(record.name.as_deref(), Some("Barra"));

        let cleared = TableRecord::new(5, "5").with_attention(true);
        record.apply(&TableChange::from(&cleared));
        assert_eq!(record, cleared);
    }

    #[test]
    fn test_full_row_flag_round_trips() {
        let json = serde_json::to_string(&TableChange::attention(1, true)).unwrap();
        assert!(!json.contains("full_row"));
        let full = TableChange::from(&TableRecord::new(1, "1"));
        let parsed: TableChange =
            serde_json::from_str(&serde_json::to_string(&full).unwrap()).unwrap();
        assert!(parsed.full_row);
    }

    #[test]
    fn test_record_deserialize_nullable_columns() {
        let json = r#"{"id":4,"code":"4","name":null,"description":null,"needs_attention":false}"#;
        let record: TableRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record, TableRecord::new(4, "4"));
    }
}
