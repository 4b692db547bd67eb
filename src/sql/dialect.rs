use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier quoting convention of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// `[name]`, row limit via `TOP n`.
    Brackets,
    /// `` `name` ``
    Backticks,
    /// `"name"`
    DoubleQuotes,
}

impl Dialect {
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Dialect::Brackets => format!("[{}]", ident.replace(']', "]]")),
            Dialect::Backticks => format!("`{}`", ident.replace('`', "``")),
            Dialect::DoubleQuotes => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// `schema.table` with each part quoted.
    pub fn quote_table(&self, table_id: &str) -> String {
        table_id
            .split('.')
            .map(|part| self.quote_ident(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn uses_top(&self) -> bool {
        matches!(self, Dialect::Brackets)
    }

    /// Sentence handed to the completion so generated SQL quotes identifiers correctly.
    pub fn quoting_rule(&self) -> &'static str {
        match self {
            Dialect::Brackets => "Quote identifiers with square brackets, e.g. [schema].[table].[column]. Limit rows with SELECT TOP n.",
            Dialect::Backticks => "Quote identifiers with backticks, e.g. `schema`.`table`.`column`. Limit rows with LIMIT n.",
            Dialect::DoubleQuotes => "Quote identifiers with double quotes, e.g. \"schema\".\"table\".\"column\". Limit rows with LIMIT n.",
        }
    }

    pub fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        match self {
            Dialect::Brackets => Box::new(sqlparser::dialect::MsSqlDialect {}),
            Dialect::Backticks => Box::new(sqlparser::dialect::MySqlDialect {}),
            Dialect::DoubleQuotes => Box::new(sqlparser::dialect::PostgreSqlDialect {}),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Brackets => write!(f, "brackets"),
            Dialect::Backticks => write!(f, "backticks"),
            Dialect::DoubleQuotes => write!(f, "double_quotes"),
        }
    }
}

impl FromStr for Dialect {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "brackets" | "mssql" | "sqlserver" | "tsql" => Ok(Dialect::Brackets),
            "backticks" | "mysql" => Ok(Dialect::Backticks),
            "double_quotes" | "doublequotes" | "postgres" | "postgresql" | "ansi" => Ok(Dialect::DoubleQuotes),
            other => Err(EngineError::Config(format!("unknown SQL dialect '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting() {
        assert_eq!(Dialect::Brackets.quote_table("rbp.RBP_GPU"), "[rbp].[RBP_GPU]");
        assert_eq!(Dialect::Backticks.quote_ident("Material"), "`Material`");
        assert_eq!(Dialect::DoubleQuotes.quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_parse() {
        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::DoubleQuotes);
        assert_eq!("BRACKETS".parse::<Dialect>().unwrap(), Dialect::Brackets);
        assert_eq!("oracle".parse::<Dialect>().unwrap_err().code(), "CONFIG_ERROR");
    }
}
