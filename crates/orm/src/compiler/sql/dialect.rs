//! SQL dialects.

use crate::types::{ColumnType, Property};

/// The points where relational engines differ.
///
/// Everything else about SQL compilation is shared.
pub trait SqlDialect: Send + Sync + std::fmt::Debug {
    /// Backend name used in error messages.
    fn name(&self) -> &'static str;

    /// Identifier quote character.
    fn quote_char(&self) -> char {
        '"'
    }

    /// Placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Case-insensitive pattern match token.
    fn contains_operator(&self) -> &'static str;

    /// Regex match token, or `None` when the engine has none.
    fn regex_operator(&self, case_insensitive: bool) -> Option<&'static str>;

    fn false_literal(&self) -> &'static str;

    fn true_literal(&self) -> &'static str;

    /// Native column type for a declared column.
    fn column_type(&self, property: &Property) -> String;

    /// Column definition of the implicit `id` primary key.
    fn id_column_type(&self) -> &'static str;

    /// Wraps a `SUM` so every engine returns the same numeric type.
    fn sum_expression(&self, column: &str) -> String {
        format!("SUM({})", column)
    }

    /// Whether `ALTER TABLE ... ADD FOREIGN KEY` is available.
    fn supports_foreign_keys(&self) -> bool;

    /// `LIMIT` operand meaning no limit, for an `OFFSET` without one.
    fn limit_all(&self) -> &'static str;

    /// Quotes an identifier, doubling embedded quote characters.
    fn quote(&self, identifier: &str) -> String {
        let q = self.quote_char();
        let escaped = identifier.replace(q, &format!("{}{}", q, q));
        format!("{}{}{}", q, escaped, q)
    }
}

/// SQLite: `?N` placeholders, `LIKE` (ASCII case-insensitive), no regex
/// operator and no `ALTER TABLE ... ADD FOREIGN KEY`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn contains_operator(&self) -> &'static str {
        "LIKE"
    }

    fn regex_operator(&self, _case_insensitive: bool) -> Option<&'static str> {
        None
    }

    fn false_literal(&self) -> &'static str {
        "0"
    }

    fn true_literal(&self) -> &'static str {
        "1"
    }

    fn column_type(&self, property: &Property) -> String {
        if property.array {
            return "TEXT".to_string();
        }
        match property.column_type {
            ColumnType::String { .. } | ColumnType::Text => "TEXT",
            ColumnType::Number => "DOUBLE",
            ColumnType::Boolean => "TINYINT",
            ColumnType::Integer => "INT",
            // RFC 3339 text with millisecond precision sorts chronologically
            ColumnType::Date => "TEXT",
            ColumnType::Object | ColumnType::GeoPoint => "TEXT",
            ColumnType::RecordId => "INTEGER",
        }
        .to_string()
    }

    fn id_column_type(&self) -> &'static str {
        "INTEGER"
    }

    fn supports_foreign_keys(&self) -> bool {
        false
    }

    fn limit_all(&self) -> &'static str {
        "-1"
    }
}

/// PostgreSQL: `$N` placeholders, `ILIKE`, `~`/`~*` regex matching and
/// native foreign keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn contains_operator(&self) -> &'static str {
        "ILIKE"
    }

    fn regex_operator(&self, case_insensitive: bool) -> Option<&'static str> {
        Some(if case_insensitive { "~*" } else { "~" })
    }

    fn false_literal(&self) -> &'static str {
        "FALSE"
    }

    fn true_literal(&self) -> &'static str {
        "TRUE"
    }

    fn column_type(&self, property: &Property) -> String {
        if property.array {
            return "JSONB".to_string();
        }
        match property.column_type {
            ColumnType::String { length } => format!("VARCHAR({})", length.unwrap_or(255)),
            ColumnType::Number => "DOUBLE PRECISION".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Integer => "BIGINT".to_string(),
            ColumnType::Date => "TIMESTAMPTZ".to_string(),
            ColumnType::Object | ColumnType::GeoPoint => "JSONB".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::RecordId => "BIGINT".to_string(),
        }
    }

    fn id_column_type(&self) -> &'static str {
        "BIGSERIAL"
    }

    fn sum_expression(&self, column: &str) -> String {
        format!("CAST(SUM({}) AS DOUBLE PRECISION)", column)
    }

    fn supports_foreign_keys(&self) -> bool {
        true
    }

    fn limit_all(&self) -> &'static str {
        "ALL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes_quote_char() {
        assert_eq!(SqliteDialect.quote("users"), "\"users\"");
        assert_eq!(SqliteDialect.quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(SqliteDialect.placeholder(3), "?3");
        assert_eq!(PostgresDialect.placeholder(3), "$3");
    }

    #[test]
    fn test_column_types() {
        let name = Property::new(ColumnType::string_with_length(64));
        assert_eq!(PostgresDialect.column_type(&name), "VARCHAR(64)");
        assert_eq!(SqliteDialect.column_type(&name), "TEXT");
        assert_eq!(PostgresDialect.column_type(&Property::string()), "VARCHAR(255)");
        assert_eq!(PostgresDialect.column_type(&Property::integer().array()), "JSONB");
        assert_eq!(SqliteDialect.column_type(&Property::boolean()), "TINYINT");
    }
}
