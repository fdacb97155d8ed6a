//! Query description passed from the data-access client to a backend.
//!
//! `FetchOptions` carries the four recognized knobs: a projection, an ordered
//! list of conjunctive filters, an ordering and a row limit. Backends that do
//! not forward the projection verbatim parse it with [`parse_select`].

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{Error, Result};

/// Projection used when none is given.
pub const SELECT_ALL: &str = "*";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    pub select: Option<String>,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, projection: impl Into<String>) -> Self {
        self.select = Some(projection.into());
        self
    }

    pub fn filter(mut self, column: impl Into<String>, operator: FilterOp, value: Value) -> Self {
        self.filters.push(Filter::new(column, operator, value));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by = Some(OrderBy {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The projection to send, defaulting to all columns.
    pub fn projection(&self) -> &str {
        self.select
            .as_deref()
            .map(str::trim)
            .filter(|projection| !projection.is_empty())
            .unwrap_or(SELECT_ALL)
    }
}

/// A single `column <op> value` predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(column: impl Into<String>, operator: FilterOp, value: Value) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Eq, value.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    Is,
    In,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Like => "like",
            FilterOp::Ilike => "ilike",
            FilterOp::Is => "is",
            FilterOp::In => "in",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let op = match raw.trim().to_ascii_lowercase().as_str() {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "like" => FilterOp::Like,
            "ilike" => FilterOp::Ilike,
            "is" => FilterOp::Is,
            "in" => FilterOp::In,
            other => {
                return Err(Error::InvalidQuery(format!(
                    "unsupported filter operator '{other}'"
                )))
            }
        };
        Ok(op)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One item of a parsed projection.
pub enum SelectItem {
    /// `*`
    All,
    /// A plain column name.
    Column(String),
    /// `relation(items)`: rows of another table joined into each result row.
    Embed {
        relation: String,
        items: Vec<SelectItem>,
    },
}

/// Parse a projection such as `*, setlist_songs(song_id, position, songs(*))`.
pub fn parse_select(expr: &str) -> Result<Vec<SelectItem>> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Ok(vec![SelectItem::All]);
    }

    split_top_level(expr)?
        .into_iter()
        .map(parse_item)
        .collect()
}

fn parse_item(raw: &str) -> Result<SelectItem> {
    let item = raw.trim();
    if item.is_empty() {
        return Err(Error::InvalidQuery("empty item in select list".into()));
    }
    if item == SELECT_ALL {
        return Ok(SelectItem::All);
    }

    match item.find('(') {
        Some(open) => {
            if !item.ends_with(')') {
                return Err(Error::InvalidQuery(format!(
                    "unterminated embed in select item '{item}'"
                )));
            }
            let relation = item[..open].trim();
            check_identifier(relation)?;
            let inner = &item[open + 1..item.len() - 1];
            Ok(SelectItem::Embed {
                relation: relation.to_string(),
                items: parse_select(inner)?,
            })
        }
        None => {
            check_identifier(item)?;
            Ok(SelectItem::Column(item.to_string()))
        }
    }
}

/// Split on commas that are not nested inside parentheses.
fn split_top_level(expr: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (idx, ch) in expr.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    Error::InvalidQuery(format!("unbalanced ')' in select '{expr}'"))
                })?;
            }
            ',' if depth == 0 => {
                parts.push(&expr[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(Error::InvalidQuery(format!(
            "unbalanced '(' in select '{expr}'"
        )));
    }
    parts.push(&expr[start..]);
    Ok(parts)
}

/// Table and column names are limited to `[A-Za-z0-9_]`, not starting with a
/// digit.
pub fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidQuery(format!("invalid identifier '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_nested_relational_projection() {
        let items = parse_select("*, setlist_songs(song_id, position, songs(*))").unwrap();
        assert_eq!(
            items,
            vec![
                SelectItem::All,
                SelectItem::Embed {
                    relation: "setlist_songs".into(),
                    items: vec![
                        SelectItem::Column("song_id".into()),
                        SelectItem::Column("position".into()),
                        SelectItem::Embed {
                            relation: "songs".into(),
                            items: vec![SelectItem::All],
                        },
                    ],
                },
            ]
        );
    }

    #[test]
    fn empty_projection_means_all_columns() {
        assert_eq!(parse_select("  ").unwrap(), vec![SelectItem::All]);
        assert_eq!(FetchOptions::new().select("").projection(), "*");
    }

    #[test]
    fn rejects_malformed_projections() {
        assert!(parse_select("songs(*").is_err());
        assert!(parse_select("title,,artist").is_err());
        assert!(parse_select("title; drop table songs").is_err());
        assert!(parse_select("a)").is_err());
    }

    #[test]
    fn filter_operators_round_trip_through_strings() {
        for op in [
            FilterOp::Eq,
            FilterOp::Neq,
            FilterOp::Gt,
            FilterOp::Gte,
            FilterOp::Lt,
            FilterOp::Lte,
            FilterOp::Like,
            FilterOp::Ilike,
            FilterOp::Is,
            FilterOp::In,
        ] {
            assert_eq!(op.as_str().parse::<FilterOp>().unwrap(), op);
        }
        assert!("between".parse::<FilterOp>().is_err());
    }

    #[test]
    fn builder_keeps_filters_in_order() {
        let options = FetchOptions::new()
            .filter("artist", FilterOp::Eq, json!("Us"))
            .filter("bpm", FilterOp::Gt, json!(100))
            .order_by("title", true)
            .limit(10);

        let columns: Vec<_> = options.filters.iter().map(|f| f.column.as_str()).collect();
        assert_eq!(columns, ["artist", "bpm"]);
        assert_eq!(options.limit, Some(10));
        assert!(options.order_by.unwrap().ascending);
    }
}
