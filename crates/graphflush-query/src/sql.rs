//! Rendering of the statements issued by the flush protocol.
//!
//! Every builder returns `(sql, params)` with placeholders numbered for the
//! target dialect, so the pair can be passed straight to a
//! [`Connection`](graphflush_core::Connection).

use crate::dialect::Dialect;
use graphflush_core::{EntityModel, Filter, Value};

/// Encode a filter as a SQL predicate.
///
/// `offset` is the number of parameters already bound by the enclosing
/// statement. An empty filter renders as `1 = 0` so it never matches a row.
pub fn encode_filter(filter: &Filter, dialect: Dialect, offset: usize) -> (String, Vec<Value>) {
    if filter.is_empty() {
        return ("1 = 0".to_string(), Vec::new());
    }

    let mut params = Vec::new();
    let mut clauses = Vec::with_capacity(filter.len());
    for clause in filter.clauses() {
        let conditions: Vec<String> = clause
            .iter()
            .map(|(column, value)| {
                params.push(value.clone());
                format!(
                    "{} = {}",
                    dialect.quote_identifier(column),
                    dialect.placeholder(offset + params.len())
                )
            })
            .collect();
        clauses.push(conditions.join(" AND "));
    }

    let sql = if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        clauses
            .iter()
            .map(|c| format!("({c})"))
            .collect::<Vec<_>>()
            .join(" OR ")
    };
    (sql, params)
}

fn column_list(model: &EntityModel, dialect: Dialect) -> String {
    model
        .fields
        .iter()
        .map(|f| dialect.quote_identifier(f.column_name()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SELECT <all columns> FROM <table> WHERE <filter>`.
pub fn select(model: &EntityModel, filter: &Filter, dialect: Dialect) -> (String, Vec<Value>) {
    let (where_sql, params) = encode_filter(filter, dialect, 0);
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        column_list(model, dialect),
        dialect.quote_identifier(model.table_name()),
        where_sql
    );
    (sql, params)
}

/// Single-row INSERT.
///
/// On Postgres the primary key is returned inline; other dialects rely on
/// the driver's last-insert id.
pub fn insert(
    model: &EntityModel,
    values: &[(String, Value)],
    dialect: Dialect,
) -> (String, Vec<Value>) {
    let table = dialect.quote_identifier(model.table_name());
    let mut sql = if values.is_empty() {
        match dialect {
            Dialect::Mysql => format!("INSERT INTO {table} () VALUES ()"),
            Dialect::Postgres | Dialect::Sqlite => format!("INSERT INTO {table} DEFAULT VALUES"),
        }
    } else {
        let columns: Vec<String> = values
            .iter()
            .map(|(column, _)| dialect.quote_identifier(column))
            .collect();
        let placeholders: Vec<String> = (1..=values.len())
            .map(|i| dialect.placeholder(i))
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        )
    };

    if dialect == Dialect::Postgres {
        if let Some(pk) = model.primary_key() {
            sql.push_str(" RETURNING ");
            sql.push_str(&dialect.quote_identifier(pk.column_name()));
        }
    }

    let params = values.iter().map(|(_, value)| value.clone()).collect();
    (sql, params)
}

/// Multi-row INSERT sharing one column list.
///
/// Returns `None` when there is nothing to insert.
pub fn insert_many(
    model: &EntityModel,
    columns: &[String],
    rows: &[Vec<Value>],
    dialect: Dialect,
) -> Option<(String, Vec<Value>)> {
    if rows.is_empty() || columns.is_empty() {
        return None;
    }

    let mut params = Vec::with_capacity(columns.len() * rows.len());
    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        let placeholders: Vec<String> = row
            .iter()
            .map(|value| {
                params.push(value.clone());
                dialect.placeholder(params.len())
            })
            .collect();
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        dialect.quote_identifier(model.table_name()),
        columns
            .iter()
            .map(|c| dialect.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", "),
        tuples.join(", ")
    );
    Some((sql, params))
}

/// `UPDATE <table> SET ... WHERE <filter>`.
pub fn update(
    model: &EntityModel,
    values: &[(String, Value)],
    filter: &Filter,
    dialect: Dialect,
) -> (String, Vec<Value>) {
    let mut params = Vec::with_capacity(values.len());
    let mut assignments = Vec::with_capacity(values.len());
    for (column, value) in values {
        params.push(value.clone());
        assignments.push(format!(
            "{} = {}",
            dialect.quote_identifier(column),
            dialect.placeholder(params.len())
        ));
    }

    let (where_sql, where_params) = encode_filter(filter, dialect, params.len());
    params.extend(where_params);

    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        dialect.quote_identifier(model.table_name()),
        assignments.join(", "),
        where_sql
    );
    (sql, params)
}

/// `DELETE FROM <table> WHERE <filter>`.
pub fn delete(model: &EntityModel, filter: &Filter, dialect: Dialect) -> (String, Vec<Value>) {
    let (where_sql, params) = encode_filter(filter, dialect, 0);
    let sql = format!(
        "DELETE FROM {} WHERE {}",
        dialect.quote_identifier(model.table_name()),
        where_sql
    );
    (sql, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphflush_core::FieldDef;

    fn user() -> EntityModel {
        EntityModel::new("user")
            .table("users")
            .field(FieldDef::primary_key("id"))
            .field(FieldDef::scalar("email").unique())
            .field(FieldDef::scalar("name").column("display_name").nullable())
    }

    #[test]
    fn test_encode_single_clause() {
        let filter = Filter::eq("email", "a@example.com");
        let (sql, params) = encode_filter(&filter, Dialect::Postgres, 2);
        assert_eq!(sql, "\"email\" = $3");
        assert_eq!(params, vec![Value::from("a@example.com")]);
    }

    #[test]
    fn test_encode_disjunction() {
        let mut filter = Filter::eq("id", 1_i64);
        filter.push(vec![
            ("name".to_string(), Value::from("x")),
            ("parent".to_string(), Value::BigInt(2)),
        ]);
        let (sql, params) = encode_filter(&filter, Dialect::Sqlite, 0);
        assert_eq!(sql, "(\"id\" = ?1) OR (\"name\" = ?2 AND \"parent\" = ?3)");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_encode_empty_filter_matches_nothing() {
        let (sql, params) = encode_filter(&Filter::new(), Dialect::Mysql, 0);
        assert_eq!(sql, "1 = 0");
        assert!(params.is_empty());
    }

    #[test]
    fn test_select_uses_columns() {
        let (sql, _) = select(&user(), &Filter::eq("id", 7_i64), Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT \"id\", \"email\", \"display_name\" FROM \"users\" WHERE \"id\" = $1"
        );
    }

    #[test]
    fn test_insert_returning_on_postgres() {
        let values = vec![("email".to_string(), Value::from("a@example.com"))];
        let (sql, params) = insert(&user(), &values, Dialect::Postgres);
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"email\") VALUES ($1) RETURNING \"id\""
        );
        assert_eq!(params.len(), 1);

        let (sql, _) = insert(&user(), &values, Dialect::Mysql);
        assert_eq!(sql, "INSERT INTO `users` (`email`) VALUES (?)");
    }

    #[test]
    fn test_insert_without_values() {
        let (sql, _) = insert(&user(), &[], Dialect::Sqlite);
        assert_eq!(sql, "INSERT INTO \"users\" DEFAULT VALUES");
        let (sql, _) = insert(&user(), &[], Dialect::Mysql);
        assert_eq!(sql, "INSERT INTO `users` () VALUES ()");
    }

    #[test]
    fn test_insert_many_numbers_placeholders_across_rows() {
        let columns = vec!["email".to_string(), "display_name".to_string()];
        let rows = vec![
            vec![Value::from("a"), Value::Null],
            vec![Value::from("b"), Value::from("B")],
        ];
        let (sql, params) = insert_many(&user(), &columns, &rows, Dialect::Postgres)
            .expect("statement for two rows");
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"email\", \"display_name\") VALUES ($1, $2), ($3, $4)"
        );
        assert_eq!(params.len(), 4);
        assert!(insert_many(&user(), &columns, &[], Dialect::Postgres).is_none());
    }

    #[test]
    fn test_update_offsets_filter_placeholders() {
        let values = vec![("display_name".to_string(), Value::from("Ann"))];
        let (sql, params) = update(
            &user(),
            &values,
            &Filter::eq("email", "a@example.com"),
            Dialect::Postgres,
        );
        assert_eq!(
            sql,
            "UPDATE \"users\" SET \"display_name\" = $1 WHERE \"email\" = $2"
        );
        assert_eq!(params, vec![Value::from("Ann"), Value::from("a@example.com")]);
    }

    #[test]
    fn test_delete() {
        let (sql, params) = delete(&user(), &Filter::eq("id", 3_i64), Dialect::Mysql);
        assert_eq!(sql, "DELETE FROM `users` WHERE `id` = ?");
        assert_eq!(params, vec![Value::BigInt(3)]);
    }
}
