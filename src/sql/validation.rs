//! Read-only guard and validation of generated SQL.

use super::Dialect;
use crate::error::{EngineError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::Statement;
use sqlparser::parser::Parser;
use tracing::warn;

lazy_static! {
    static ref MUTATING: Regex =
        Regex::new(r"(?i)\b(DROP|DELETE|TRUNCATE|UPDATE|INSERT|ALTER)\b").unwrap();
    /// String literals and quoted identifiers in every supported dialect.
    static ref QUOTED: Regex =
        Regex::new(r#"'(?:[^']|'')*'|"(?:[^"]|"")*"|`[^`]*`|\[[^\]]*\]"#).unwrap();
    static ref SELECT: Regex = Regex::new(r"(?i)\bSELECT\b").unwrap();
    static ref FROM: Regex = Regex::new(r"(?i)\bFROM\b").unwrap();
}

fn mutating_keyword(text: &str) -> Result<()> {
    match MUTATING.find(text) {
        Some(m) => Err(EngineError::validation_failed(format!(
            "SQL contains mutating keyword {}",
            m.as_str().to_uppercase()
        ))),
        None => Ok(()),
    }
}

enum ParseOutcome {
    ReadOnly,
    Rejected(String),
    Unparsed(String),
}

fn parse_read_only(sql: &str, dialect: Dialect) -> ParseOutcome {
    let statements = match Parser::parse_sql(dialect.parser_dialect().as_ref(), sql) {
        Ok(statements) => statements,
        Err(e) => return ParseOutcome::Unparsed(format!("SQL does not parse: {}", e)),
    };
    match statements.as_slice() {
        [Statement::Query(_)] => ParseOutcome::ReadOnly,
        [] => ParseOutcome::Rejected("no statement found".to_string()),
        [_] => ParseOutcome::Rejected("statement is not a query".to_string()),
        many => ParseOutcome::Rejected(format!("expected one statement, found {}", many.len())),
    }
}

/// Guard applied to every SQL handed to an executor, cached SQL included.
///
/// SQL the parser reads must be a single query. Vendor SQL it cannot read falls
/// back to a keyword scan with literals and quoted identifiers removed.
pub fn ensure_read_only(sql: &str, dialect: Dialect) -> Result<()> {
    if sql.trim().is_empty() {
        return Err(EngineError::validation_failed("SQL is empty"));
    }
    match parse_read_only(sql, dialect) {
        ParseOutcome::ReadOnly => Ok(()),
        ParseOutcome::Rejected(reason) => Err(EngineError::validation_failed(reason)),
        ParseOutcome::Unparsed(reason) => {
            warn!("{}; relying on keyword scan", reason);
            mutating_keyword(&QUOTED.replace_all(sql, "''"))
        }
    }
}

/// Full validation for freshly generated SQL: structure, safety, parseability
/// and the confidence floor.
pub fn validate_generated(
    sql: &str,
    confidence: f64,
    min_confidence: f64,
    dialect: Dialect,
) -> Result<()> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation_failed("SQL is empty"));
    }
    if !SELECT.is_match(trimmed) || !FROM.is_match(trimmed) {
        return Err(EngineError::validation_failed("SQL must contain SELECT and FROM"));
    }
    // LLM output is scanned verbatim, literals included.
    mutating_keyword(trimmed)?;
    if confidence < min_confidence {
        return Err(EngineError::validation_failed(format!(
            "confidence {:.2} is below the minimum {:.2}",
            confidence, min_confidence
        )));
    }
    match parse_read_only(trimmed, dialect) {
        ParseOutcome::ReadOnly => Ok(()),
        ParseOutcome::Rejected(reason) | ParseOutcome::Unparsed(reason) => {
            Err(EngineError::validation_failed(reason))
        }
    }
}
