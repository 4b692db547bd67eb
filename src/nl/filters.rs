//! Filter extraction: status vocabulary and comparative clauses.

use super::resolver::{tokenize, TableMention};
use super::vocabulary::is_status_word;
use super::{Filter, FilterOperator};
use crate::knowledge_graph::{ColumnNode, KnowledgeGraph};
use regex::Regex;
use tracing::debug;

/// Values a comparative regex may capture that are really part of the grammar.
const NOT_A_VALUE: &[&str] = &["not", "null", "a", "an", "the", "in", "than"];

/// Regex fragment matching a column name with `_`, `-` or spaces between its parts.
fn column_pattern(column: &str) -> String {
    tokenize(column)
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join(r"[\s_\-]*")
}

fn comparative_filters(text: &str, table_id: &str, column: &ColumnNode) -> Vec<Filter> {
    let col = column_pattern(&column.name);
    if col.is_empty() {
        return Vec::new();
    }
    let mut filters = Vec::new();
    let filter = |operator: FilterOperator, value: &str| Filter {
        table: table_id.to_string(),
        column: column.name.clone(),
        operator,
        value: value.to_string(),
    };

    let symbolic = format!(
        r"(?i)\b{}\s*(>=|<=|<>|!=|>|<)\s*(-?\d+(?:\.\d+)?)",
        col
    );
    if let Ok(re) = Regex::new(&symbolic) {
        for caps in re.captures_iter(text) {
            let operator = match &caps[1] {
                ">=" => FilterOperator::Gte,
                "<=" => FilterOperator::Lte,
                ">" => FilterOperator::Gt,
                "<" => FilterOperator::Lt,
                _ => FilterOperator::NotEq,
            };
            filters.push(filter(operator, &caps[2]));
        }
    }

    let worded = format!(
        r"(?i)\b{}\s+(?:is\s+)?(greater|more|higher|less|lower|fewer)\s+than\s+(-?\d+(?:\.\d+)?)",
        col
    );
    if let Ok(re) = Regex::new(&worded) {
        for caps in re.captures_iter(text) {
            let operator = match caps[1].to_lowercase().as_str() {
                "greater" | "more" | "higher" => FilterOperator::Gt,
                _ => FilterOperator::Lt,
            };
            filters.push(filter(operator, &caps[2]));
        }
    }

    let equality = format!(
        r#"(?i)\b{}\s*(?:=|==|\bequals\b|\bequal\s+to\b|\bis\b)\s*(?:'([^']*)'|"([^"]*)"|([\w.\-]+))"#,
        col
    );
    if let Ok(re) = Regex::new(&equality) {
        for caps in re.captures_iter(text) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str())
                .unwrap_or("");
            if value.is_empty() || NOT_A_VALUE.contains(&value.to_lowercase().as_str()) {
                continue;
            }
            if matches!(
                value.to_lowercase().as_str(),
                "greater" | "more" | "higher" | "less" | "lower" | "fewer"
            ) {
                continue;
            }
            filters.push(filter(FilterOperator::Eq, value));
        }
    }

    let like = format!(
        r#"(?i)\b{}\s+(?:contains?|like)\s+(?:'([^']*)'|"([^"]*)"|([\w.\-]+))"#,
        col
    );
    if let Ok(re) = Regex::new(&like) {
        for caps in re.captures_iter(text) {
            if let Some(value) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
                filters.push(filter(FilterOperator::Like, &format!("%{}%", value.as_str())));
            }
        }
    }

    filters
}

/// Filters for the resolved tables. A status word becomes a case-insensitive
/// filter on the first resolved table that has a status column, unless that
/// column already carries an explicit filter.
pub fn extract_filters(text: &str, kg: &KnowledgeGraph, tables: &[TableMention]) -> Vec<Filter> {
    let mut filters: Vec<Filter> = Vec::new();
    for mention in tables {
        let Some(node) = kg.node(&mention.table_id) else {
            continue;
        };
        for column in node.active_columns() {
            filters.extend(comparative_filters(text, &node.id, column));
        }
    }

    let status_words: Vec<String> = tokenize(text).into_iter().filter(|t| is_status_word(t)).collect();
    if let Some(word) = status_words.first() {
        let status_target = tables.iter().find_map(|m| {
            kg.node(&m.table_id)
                .and_then(|n| n.status_column().map(|c| (n.id.clone(), c.name.clone())))
        });
        match status_target {
            Some((table, column)) => {
                let already = filters
                    .iter()
                    .any(|f| f.table == table && f.column.eq_ignore_ascii_case(&column));
                if !already {
                    filters.push(Filter {
                        table,
                        column,
                        operator: FilterOperator::EqIgnoreCase,
                        value: word.clone(),
                    });
                }
            }
            None => debug!("Status word '{}' found but no resolved table has a status column", word),
        }
    }
    filters
}
