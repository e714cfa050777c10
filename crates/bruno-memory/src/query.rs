//! Memory query building.
//!
//! A [`MemoryQuery`] is first lowered into an engine-agnostic list of
//! [`Predicate`]s, then folded into parameterized SQL. Free-text matching is
//! delegated to a [`TextSearch`] strategy chosen once per connection: the
//! FTS5 index when available, a `LIKE` substring scan otherwise.

use std::fmt;

use rusqlite::ToSql;
use rusqlite::types::ToSqlOutput;

use bruno_types::{MemoryQuery, Timestamp};

use crate::codec::{MEMORY_COLUMNS, MESSAGE_COLUMNS, encode_timestamp, select_list};

// ─────────────────────────────────────────────────────────────────────────────
// Values and Predicates
// ─────────────────────────────────────────────────────────────────────────────

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Text(String),
    Real(f64),
    Integer(i64),
}

impl From<&str> for QueryValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for QueryValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<i64> for QueryValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<&Timestamp> for QueryValue {
    fn from(ts: &Timestamp) -> Self {
        Self::Text(encode_timestamp(ts))
    }
}

impl ToSql for QueryValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Text(s) => ToSqlOutput::from(s.as_str()),
            Self::Real(v) => ToSqlOutput::from(*v),
            Self::Integer(v) => ToSqlOutput::from(*v),
        })
    }
}

/// Direction of a [`Predicate::Range`] bound. Both are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    AtLeast,
    AtMost,
}

/// One condition a memory entry must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals {
        column: &'static str,
        value: QueryValue,
    },
    Range {
        column: &'static str,
        bound: Bound,
        value: QueryValue,
    },
    /// Column equals any of the values.
    SetMembership {
        column: &'static str,
        values: Vec<QueryValue>,
    },
    /// Content contains the text, as decided by the active [`TextSearch`].
    TextMatch { text: String },
    /// The JSON tag array contains every one of these tags exactly.
    TagConjunction { tags: Vec<String> },
    /// Expiry is absent or strictly after `now`.
    NotExpired { now: QueryValue },
}

// ─────────────────────────────────────────────────────────────────────────────
// SQL Fragments
// ─────────────────────────────────────────────────────────────────────────────

/// A SQL statement or clause with its positional parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<QueryValue>,
}

impl SqlQuery {
    pub fn new(sql: impl Into<String>, params: Vec<QueryValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn params(&self) -> rusqlite::ParamsFromIter<std::slice::Iter<'_, QueryValue>> {
        rusqlite::params_from_iter(self.params.iter())
    }
}

impl Predicate {
    /// Render this predicate against `memory_entries`.
    pub fn to_sql(&self, search: &dyn TextSearch) -> SqlQuery {
        match self {
            Self::Equals { column, value } => {
                SqlQuery::new(format!("{column} = ?"), vec![value.clone()])
            }
            Self::Range {
                column,
                bound,
                value,
            } => {
                let op = match bound {
                    Bound::AtLeast => ">=",
                    Bound::AtMost => "<=",
                };
                SqlQuery::new(format!("{column} {op} ?"), vec![value.clone()])
            }
            Self::SetMembership { column, values } => {
                let placeholders = vec!["?"; values.len()].join(", ");
                SqlQuery::new(format!("{column} IN ({placeholders})"), values.clone())
            }
            Self::TextMatch { text } => search.memory_clause(text),
            Self::TagConjunction { tags } => {
                let clause = vec![
                    "EXISTS (SELECT 1 FROM json_each(memory_entries.tags) WHERE json_each.value = ?)";
                    tags.len()
                ]
                .join(" AND ");
                SqlQuery::new(
                    clause,
                    tags.iter().map(|t| QueryValue::from(t.as_str())).collect(),
                )
            }
            Self::NotExpired { now } => SqlQuery::new(
                "(expires_at IS NULL OR expires_at > ?)",
                vec![now.clone()],
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Filter
// ─────────────────────────────────────────────────────────────────────────────

/// A [`MemoryQuery`] lowered to predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryFilter {
    predicates: Vec<Predicate>,
    limit: Option<usize>,
}

impl MemoryFilter {
    /// Lower `query`, evaluating expiry against `now`.
    ///
    /// Empty collections and blank text add no predicate.
    pub fn from_query(query: &MemoryQuery, now: &Timestamp) -> Self {
        let mut predicates = Vec::new();

        if let Some(user_id) = &query.user_id {
            predicates.push(Predicate::Equals {
                column: "user_id",
                value: user_id.as_str().into(),
            });
        }
        if let Some(conversation_id) = &query.conversation_id {
            predicates.push(Predicate::Equals {
                column: "conversation_id",
                value: conversation_id.as_str().into(),
            });
        }
        if !query.memory_types.is_empty() {
            predicates.push(Predicate::SetMembership {
                column: "memory_type",
                values: query
                    .memory_types
                    .iter()
                    .map(|t| t.as_str().into())
                    .collect(),
            });
        }
        if let Some(min) = query.min_importance {
            predicates.push(Predicate::Range {
                column: "importance",
                bound: Bound::AtLeast,
                value: min.into(),
            });
        }
        if !query.tags.is_empty() {
            predicates.push(Predicate::TagConjunction {
                tags: query.tags.clone(),
            });
        }
        if let Some(text) = query
            .query_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            predicates.push(Predicate::TextMatch {
                text: text.to_string(),
            });
        }
        if let Some(start) = &query.start {
            predicates.push(Predicate::Range {
                column: "timestamp",
                bound: Bound::AtLeast,
                value: start.into(),
            });
        }
        if let Some(end) = &query.end {
            predicates.push(Predicate::Range {
                column: "timestamp",
                bound: Bound::AtMost,
                value: end.into(),
            });
        }
        predicates.push(Predicate::NotExpired { now: now.into() });

        Self {
            predicates,
            limit: query.limit,
        }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Fold into a full `SELECT` ordered by importance, then recency, then id.
    pub fn to_sql(&self, search: &dyn TextSearch) -> SqlQuery {
        let mut sql = format!(
            "SELECT {} FROM memory_entries WHERE 1=1",
            select_list(&MEMORY_COLUMNS, None)
        );
        let mut params = Vec::new();

        for predicate in &self.predicates {
            let fragment = predicate.to_sql(search);
            sql.push_str(" AND ");
            sql.push_str(&fragment.sql);
            params.extend(fragment.params);
        }

        sql.push_str(" ORDER BY importance DESC, timestamp DESC, id ASC");
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(QueryValue::Integer(to_i64(limit)));
        }

        SqlQuery { sql, params }
    }
}

pub(crate) fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Text Search Strategies
// ─────────────────────────────────────────────────────────────────────────────

/// How free text is matched against stored content.
pub trait TextSearch: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Clause restricting `memory_entries` rows to those whose content
    /// contains `text`.
    fn memory_clause(&self, text: &str) -> SqlQuery;

    /// Complete message search statement.
    fn message_search(&self, text: &str, user_id: Option<&str>, limit: usize) -> SqlQuery;
}

/// Pick the strategy for a connection.
pub fn text_search_for(fts_available: bool) -> Box<dyn TextSearch> {
    if fts_available {
        Box::new(FtsSearch)
    } else {
        Box::new(SubstringSearch)
    }
}

/// Matches through the FTS5 shadow tables, ranked by relevance.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtsSearch;

/// Matches with an escaped `LIKE` scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringSearch;

/// Quote `text` as a single FTS5 phrase so operators in user input are inert.
pub fn fts_phrase(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// `%text%` with `LIKE` wildcards escaped by `\`.
pub fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl TextSearch for FtsSearch {
    fn name(&self) -> &'static str {
        "fts5"
    }

    // Restricted to the content column so results agree with the substring path.
    fn memory_clause(&self, text: &str) -> SqlQuery {
        SqlQuery::new(
            "id IN (SELECT memory_id FROM memory_entries_fts WHERE memory_entries_fts MATCH ?)",
            vec![format!("content : {}", fts_phrase(text)).into()],
        )
    }

    fn message_search(&self, text: &str, user_id: Option<&str>, limit: usize) -> SqlQuery {
        let mut sql = format!(
            "SELECT {} FROM messages m \
             JOIN messages_fts ON messages_fts.message_id = m.id \
             WHERE messages_fts MATCH ?",
            select_list(&MESSAGE_COLUMNS, Some("m"))
        );
        let mut params = vec![QueryValue::from(fts_phrase(text))];

        if let Some(user_id) = user_id {
            sql.push_str(" AND m.user_id = ?");
            params.push(user_id.into());
        }
        sql.push_str(" ORDER BY messages_fts.rank, m.timestamp DESC, m.id ASC LIMIT ?");
        params.push(QueryValue::Integer(to_i64(limit)));

        SqlQuery { sql, params }
    }
}

impl TextSearch for SubstringSearch {
    fn name(&self) -> &'static str {
        "substring"
    }

    fn memory_clause(&self, text: &str) -> SqlQuery {
        SqlQuery::new(
            "content LIKE ? ESCAPE '\\'",
            vec![like_pattern(text).into()],
        )
    }

    fn message_search(&self, text: &str, user_id: Option<&str>, limit: usize) -> SqlQuery {
        let mut sql = format!(
            "SELECT {} FROM messages WHERE content LIKE ? ESCAPE '\\'",
            select_list(&MESSAGE_COLUMNS, None)
        );
        let mut params = vec![QueryValue::from(like_pattern(text))];

        if let Some(user_id) = user_id {
            sql.push_str(" AND user_id = ?");
            params.push(user_id.into());
        }
        sql.push_str(" ORDER BY timestamp DESC, id ASC LIMIT ?");
        params.push(QueryValue::Integer(to_i64(limit)));

        SqlQuery { sql, params }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bruno_types::MemoryType;
    use chrono::{TimeZone, Utc};

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_query_only_excludes_expired() {
        let filter = MemoryFilter::from_query(&MemoryQuery::new(), &now());
        assert_eq!(filter.predicates().len(), 1);
        assert!(matches!(
            filter.predicates()[0],
            Predicate::NotExpired { .. }
        ));

        let sql = filter.to_sql(&SubstringSearch);
        assert!(sql.sql.ends_with("ORDER BY importance DESC, timestamp DESC, id ASC"));
        assert_eq!(sql.params.len(), 1);
    }

    #[test]
    fn test_full_query_lowering() {
        let query = MemoryQuery::for_user("u1")
            .with_conversation("c1")
            .with_memory_type(MemoryType::Fact)
            .with_memory_type(MemoryType::Preference)
            .with_min_importance(0.4)
            .with_tag("a")
            .with_tag("b")
            .with_text("tea")
            .between(now(), now())
            .with_limit(5);

        let filter = MemoryFilter::from_query(&query, &now());
        assert_eq!(filter.predicates().len(), 9);
        assert_eq!(filter.limit(), Some(5));

        let sql = filter.to_sql(&SubstringSearch);
        assert!(sql.sql.contains("user_id = ?"));
        assert!(sql.sql.contains("memory_type IN (?, ?)"));
        assert!(sql.sql.contains("importance >= ?"));
        assert_eq!(sql.sql.matches("json_each(memory_entries.tags)").count(), 2);
        assert!(sql.sql.contains("timestamp <= ?"));
        assert!(sql.sql.ends_with("LIMIT ?"));
        // user, conv, 2 types, importance, 2 tags, text, start, end, expiry, limit
        assert_eq!(sql.params.len(), 12);
        assert_eq!(sql.params.last(), Some(&QueryValue::Integer(5)));
    }

    #[test]
    fn test_blank_text_is_ignored() {
        let query = MemoryQuery::new().with_text("   ");
        let filter = MemoryFilter::from_query(&query, &now());
        assert!(
            !filter
                .predicates()
                .iter()
                .any(|p| matches!(p, Predicate::TextMatch { .. }))
        );
    }

    #[test]
    fn test_text_match_follows_strategy() {
        let query = MemoryQuery::new().with_text("green tea");
        let filter = MemoryFilter::from_query(&query, &now());

        let fts = filter.to_sql(&FtsSearch);
        assert!(fts.sql.contains("memory_entries_fts MATCH ?"));
        assert_eq!(fts.params[0], QueryValue::from("content : \"green tea\""));

        let like = filter.to_sql(&SubstringSearch);
        assert!(like.sql.contains("content LIKE ? ESCAPE"));
        assert_eq!(like.params[0], QueryValue::from("%green tea%"));
    }

    #[test]
    fn test_fts_phrase_quotes_operators() {
        assert_eq!(fts_phrase("hello"), "\"hello\"");
        assert_eq!(fts_phrase("say \"hi\" OR NOT"), "\"say \"\"hi\"\" OR NOT\"");
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn test_message_search_statements() {
        let fts = FtsSearch.message_search("world", Some("u1"), 10);
        assert!(fts.sql.contains("JOIN messages_fts"));
        assert!(fts.sql.contains("m.user_id = ?"));
        assert!(fts.sql.contains("ORDER BY messages_fts.rank"));
        assert_eq!(fts.params.len(), 3);

        let like = SubstringSearch.message_search("world", None, 10);
        assert!(!like.sql.contains("user_id = ?"));
        assert!(like.sql.contains("ORDER BY timestamp DESC"));
        assert_eq!(like.params.len(), 2);
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(text_search_for(true).name(), "fts5");
        assert_eq!(text_search_for(false).name(), "substring");
    }
}
