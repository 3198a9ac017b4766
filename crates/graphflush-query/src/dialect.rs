//! SQL dialect differences relevant to flush statements.

/// Placeholder and quoting style of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// `$n` parameters, double-quoted identifiers.
    #[default]
    Postgres,
    /// `?n` parameters, double-quoted identifiers.
    Sqlite,
    /// Bare `?` parameters, backtick identifiers.
    Mysql,
}

impl Dialect {
    /// Marker for parameter `position`, counting from 1.
    pub fn placeholder(self, position: usize) -> String {
        match self {
            Dialect::Postgres => format!("${position}"),
            Dialect::Sqlite => format!("?{position}"),
            Dialect::Mysql => String::from("?"),
        }
    }

    /// Quote a table or column name, doubling any embedded quote character.
    pub fn quote_identifier(self, name: &str) -> String {
        let quote = match self {
            Dialect::Postgres | Dialect::Sqlite => '"',
            Dialect::Mysql => '`',
        };
        let escaped = name.replace(quote, &format!("{quote}{quote}"));
        format!("{quote}{escaped}{quote}")
    }
}
