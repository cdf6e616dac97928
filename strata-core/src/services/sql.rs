//! Pre-flight SQL syntax checks for text bodies

use sqlparser::dialect::{
    Dialect, DuckDbDialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use sqlparser::parser::Parser;

use crate::ports::Engine;

fn dialect_for(engine: Engine) -> Box<dyn Dialect> {
    match engine {
        Engine::Postgres => Box::new(PostgreSqlDialect {}),
        Engine::MySql => Box::new(MySqlDialect {}),
        Engine::DuckDb => Box::new(DuckDbDialect {}),
        Engine::Sqlite => Box::new(SQLiteDialect {}),
        Engine::Other => Box::new(GenericDialect {}),
    }
}

/// Parse `sql` with the engine's dialect, returning the parser's message on
/// failure.
pub fn validate_sql_syntax(sql: &str, engine: Engine) -> Result<(), String> {
    let dialect = dialect_for(engine);
    Parser::parse_sql(dialect.as_ref(), sql).map_err(|e| {
        let msg = e.to_string();
        msg.trim_start_matches("sql parser error: ").to_string()
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_multi_statement_body() {
        let sql = "CREATE TABLE users (id INTEGER PRIMARY KEY, email VARCHAR);\n\
                   CREATE INDEX idx_users_email ON users (email);";
        assert!(validate_sql_syntax(sql, Engine::DuckDb).is_ok());
        assert!(validate_sql_syntax(sql, Engine::Postgres).is_ok());
    }

    #[test]
    fn test_malformed_body_reports_parser_message() {
        let err = validate_sql_syntax("CREATE TABLE (", Engine::DuckDb).unwrap_err();
        assert!(!err.starts_with("sql parser error"), "{}", err);
        assert!(!err.is_empty());
    }

    #[test]
    fn test_empty_body_is_valid() {
        assert!(validate_sql_syntax("", Engine::Other).is_ok());
    }
}
