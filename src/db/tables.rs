//! Generic table access over SQLite, shaped like the hosted service's data
//! API: projections with embedded relations, conjunctive filters, ordering,
//! limits, and writes that echo the affected rows.
//!
//! Identifiers never reach SQL unchecked: table names go through
//! [`check_data_table`] and column names are matched against
//! `PRAGMA table_info` before being quoted into a statement. Values are always
//! bound parameters.

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, Error as SqlError, ErrorCode, Row};
use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};
use crate::query::{check_identifier, parse_select, FetchOptions, Filter, FilterOp, OrderBy, SelectItem};

/// Tables with this prefix hold credentials and stay off the data API.
const PRIVATE_PREFIX: &str = "auth_";

type JsonRow = Map<String, Value>;

pub(crate) fn select(conn: &Connection, table: &str, options: &FetchOptions) -> Result<Vec<Value>> {
    check_data_table(table)?;
    let items = parse_select(options.projection())?;
    select_projected(
        conn,
        table,
        &items,
        &options.filters,
        options.order_by.as_ref(),
        options.limit,
    )
}

pub(crate) fn insert(conn: &Connection, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
    check_data_table(table)?;
    let columns = table_columns(conn, table)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|err| sql_error(table, err))?;

    let mut inserted = Vec::with_capacity(rows.len());
    for row in rows {
        let Value::Object(fields) = row else {
            return Err(Error::query(table, "rows must be JSON objects"));
        };

        let sql = if fields.is_empty() {
            format!("INSERT INTO \"{table}\" DEFAULT VALUES RETURNING *")
        } else {
            let mut names = Vec::with_capacity(fields.len());
            for name in fields.keys() {
                ensure_column(table, &columns, name)?;
                names.push(format!("\"{name}\""));
            }
            let placeholders = vec!["?"; names.len()].join(", ");
            format!(
                "INSERT INTO \"{table}\" ({}) VALUES ({placeholders}) RETURNING *",
                names.join(", ")
            )
        };

        let params: Vec<SqlValue> = fields.values().map(to_sql_value).collect();
        inserted.extend(run_rows(&tx, table, &sql, &params)?.into_iter().map(Value::Object));
    }

    tx.commit().map_err(|err| sql_error(table, err))?;
    Ok(inserted)
}

pub(crate) fn update(
    conn: &Connection,
    table: &str,
    filters: &[Filter],
    patch: Value,
) -> Result<Vec<Value>> {
    check_data_table(table)?;
    let columns = table_columns(conn, table)?;
    let Value::Object(fields) = patch else {
        return Err(Error::query(table, "update patch must be a JSON object"));
    };
    if fields.is_empty() {
        return Err(Error::query(table, "update patch has no columns"));
    }

    let mut assignments = Vec::with_capacity(fields.len());
    let mut params = Vec::with_capacity(fields.len() + filters.len());
    for (name, value) in &fields {
        ensure_column(table, &columns, name)?;
        assignments.push(format!("\"{name}\" = ?"));
        params.push(to_sql_value(value));
    }

    let mut sql = format!("UPDATE \"{table}\" SET {}", assignments.join(", "));
    sql.push_str(&where_clause(table, &columns, filters, &mut params)?);
    sql.push_str(" RETURNING *");

    Ok(run_rows(conn, table, &sql, &params)?
        .into_iter()
        .map(Value::Object)
        .collect())
}

pub(crate) fn delete(conn: &Connection, table: &str, filters: &[Filter]) -> Result<Vec<Value>> {
    check_data_table(table)?;
    let columns = table_columns(conn, table)?;
    let mut params = Vec::new();
    let mut sql = format!("DELETE FROM \"{table}\"");
    sql.push_str(&where_clause(table, &columns, filters, &mut params)?);
    sql.push_str(" RETURNING *");

    Ok(run_rows(conn, table, &sql, &params)?
        .into_iter()
        .map(Value::Object)
        .collect())
}

fn select_projected(
    conn: &Connection,
    table: &str,
    items: &[SelectItem],
    filters: &[Filter],
    order: Option<&OrderBy>,
    limit: Option<usize>,
) -> Result<Vec<Value>> {
    let columns = table_columns(conn, table)?;
    for item in items {
        if let SelectItem::Column(name) = item {
            ensure_column(table, &columns, name)?;
        }
    }
    let mut params = Vec::new();
    let mut sql = format!("SELECT * FROM \"{table}\"");
    sql.push_str(&where_clause(table, &columns, filters, &mut params)?);

    // Insertion order breaks ties so repeated reads come back identical.
    match order {
        Some(order) => {
            ensure_column(table, &columns, &order.column)?;
            let direction = if order.ascending { "ASC" } else { "DESC" };
            sql.push_str(&format!(
                " ORDER BY \"{}\" {direction}, rowid {direction}",
                order.column
            ));
        }
        None => sql.push_str(" ORDER BY rowid"),
    }
    if let Some(limit) = limit {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    }

    run_rows(conn, table, &sql, &params)?
        .into_iter()
        .map(|row| project(conn, table, &columns, row, items))
        .collect()
}

fn project(
    conn: &Connection,
    table: &str,
    columns: &[String],
    row: JsonRow,
    items: &[SelectItem],
) -> Result<Value> {
    let mut projected = Map::new();
    for item in items {
        match item {
            SelectItem::All => {
                for (name, value) in &row {
                    projected.insert(name.clone(), value.clone());
                }
            }
            SelectItem::Column(name) => {
                ensure_column(table, columns, name)?;
                projected.insert(name.clone(), row.get(name).cloned().unwrap_or(Value::Null));
            }
            SelectItem::Embed { relation, items } => {
                let embedded = embed(conn, table, columns, &row, relation, items)?;
                projected.insert(relation.clone(), embedded);
            }
        }
    }
    Ok(Value::Object(projected))
}

/// Resolve `relation(items)` for one parent row.
///
/// A `<singular(relation)>_id` column on the parent makes it a many-to-one
/// join (object or null); a `<singular(table)>_id` column on the relation
/// makes it one-to-many (array).
fn embed(
    conn: &Connection,
    table: &str,
    columns: &[String],
    row: &JsonRow,
    relation: &str,
    items: &[SelectItem],
) -> Result<Value> {
    check_data_table(relation)?;

    let parent_key = format!("{}_id", singular(relation));
    if columns.contains(&parent_key) {
        let Some(key) = row.get(&parent_key).filter(|value| !value.is_null()) else {
            return Ok(Value::Null);
        };
        let rows = select_projected(
            conn,
            relation,
            items,
            &[Filter::eq("id", key.clone())],
            None,
            Some(1),
        )?;
        return Ok(rows.into_iter().next().unwrap_or(Value::Null));
    }

    let child_key = format!("{}_id", singular(table));
    let child_columns = table_columns(conn, relation)?;
    if child_columns.contains(&child_key) {
        let id = row.get("id").cloned().unwrap_or(Value::Null);
        let rows = select_projected(conn, relation, items, &[Filter::eq(child_key, id)], None, None)?;
        return Ok(Value::Array(rows));
    }

    Err(Error::query(
        table,
        format!("Could not find a relationship between '{table}' and '{relation}'"),
    ))
}

fn where_clause(
    table: &str,
    columns: &[String],
    filters: &[Filter],
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    if filters.is_empty() {
        return Ok(String::new());
    }

    let mut predicates = Vec::with_capacity(filters.len());
    for filter in filters {
        ensure_column(table, columns, &filter.column)?;
        let column = format!("\"{}\"", filter.column);

        let predicate = match filter.operator {
            FilterOp::Eq | FilterOp::Neq | FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                params.push(to_sql_value(&filter.value));
                format!("{column} {} ?", comparison(filter.operator))
            }
            FilterOp::Like => {
                params.push(SqlValue::Text(like_pattern(&filter.value)));
                format!("{column} LIKE ?")
            }
            FilterOp::Ilike => {
                params.push(SqlValue::Text(like_pattern(&filter.value)));
                format!("LOWER({column}) LIKE LOWER(?)")
            }
            FilterOp::Is => match is_operand(&filter.value) {
                Some(operand) => format!("{column} IS {operand}"),
                None => {
                    return Err(Error::InvalidQuery(format!(
                        "'is' expects null, true or false, got {}",
                        filter.value
                    )))
                }
            },
            FilterOp::In => {
                let Value::Array(values) = &filter.value else {
                    return Err(Error::InvalidQuery(format!(
                        "'in' expects a list, got {}",
                        filter.value
                    )));
                };
                if values.is_empty() {
                    "0".to_string()
                } else {
                    params.extend(values.iter().map(to_sql_value));
                    format!("{column} IN ({})", vec!["?"; values.len()].join(", "))
                }
            }
        };
        predicates.push(predicate);
    }

    Ok(format!(" WHERE {}", predicates.join(" AND ")))
}

fn comparison(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Neq => "<>",
        FilterOp::Gt => ">",
        FilterOp::Gte => ">=",
        FilterOp::Lt => "<",
        FilterOp::Lte => "<=",
        _ => "=",
    }
}

/// The hosted service accepts `*` as a wildcard in like patterns.
fn like_pattern(value: &Value) -> String {
    match value {
        Value::String(text) => text.replace('*', "%"),
        other => other.to_string(),
    }
}

fn is_operand(value: &Value) -> Option<&'static str> {
    match value {
        Value::Null => Some("NULL"),
        Value::Bool(true) => Some("1"),
        Value::Bool(false) => Some("0"),
        Value::String(text) => match text.to_ascii_lowercase().as_str() {
            "null" => Some("NULL"),
            "true" => Some("1"),
            "false" => Some("0"),
            _ => None,
        },
        _ => None,
    }
}

fn run_rows(conn: &Connection, table: &str, sql: &str, params: &[SqlValue]) -> Result<Vec<JsonRow>> {
    let mut stmt = conn.prepare(sql).map_err(|err| sql_error(table, err))?;
    let names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| row_to_json(row, &names))
        .map_err(|err| sql_error(table, err))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| sql_error(table, err))?;

    Ok(rows)
}

fn row_to_json(row: &Row<'_>, names: &[String]) -> rusqlite::Result<JsonRow> {
    let mut object = Map::with_capacity(names.len());
    for (idx, name) in names.iter().enumerate() {
        let value = match row.get_ref(idx)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(int) => Value::from(int),
            ValueRef::Real(real) => Number::from_f64(real).map(Value::Number).unwrap_or(Value::Null),
            ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
            ValueRef::Blob(bytes) => Value::from(bytes.to_vec()),
        };
        object.insert(name.clone(), value);
    }
    Ok(object)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(int) => SqlValue::Integer(int),
            None => SqlValue::Real(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Column names of `table`, in declaration order.
pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    check_identifier(table)?;
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{table}\")"))
        .map_err(|err| sql_error(table, err))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|err| sql_error(table, err))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| sql_error(table, err))?;

    if columns.is_empty() {
        return Err(missing_relation(table));
    }
    Ok(columns)
}

fn check_data_table(table: &str) -> Result<()> {
    check_identifier(table)?;
    if table.starts_with(PRIVATE_PREFIX) || table.starts_with("sqlite_") {
        return Err(missing_relation(table));
    }
    Ok(())
}

fn ensure_column(table: &str, columns: &[String], name: &str) -> Result<()> {
    if columns.iter().any(|column| column == name) {
        Ok(())
    } else {
        Err(Error::query(
            table,
            format!("Could not find the '{name}' column of '{table}' in the schema cache"),
        ))
    }
}

fn missing_relation(table: &str) -> Error {
    Error::query(table, format!("relation \"{table}\" does not exist"))
}

fn singular(name: &str) -> &str {
    name.strip_suffix('s').unwrap_or(name)
}

/// Turn SQLite failures into query errors, calling out constraint violations
/// (duplicate junction rows, dangling foreign keys, missing required columns).
fn sql_error(table: &str, err: SqlError) -> Error {
    if matches!(err.sqlite_error_code(), Some(ErrorCode::ConstraintViolation)) {
        Error::query(table, format!("constraint violation on {table}: {err}"))
    } else {
        Error::query(table, err.to_string())
    }
}
