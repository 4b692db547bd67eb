//! Table and column resolution against the knowledge graph registry.
//!
//! Text and registry entries are tokenized the same way (lowercase, split on
//! anything that is not a letter or digit), so `RBP_GPU`, `rbp gpu` and
//! `Rbp-Gpu` all resolve to the same table. Matching is greedy: at each
//! position the entry with the most tokens wins.

use super::vocabulary::StopWords;
use crate::knowledge_graph::{KnowledgeGraph, TableNode};

pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    tokens: Vec<String>,
    table_id: String,
    confidence: f64,
}

/// A resolved table and where it was mentioned.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMention {
    pub table_id: String,
    /// Token span `[start, end)` in the tokenized text.
    pub start: usize,
    pub end: usize,
}

/// A column of a resolved table named in the text.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMention {
    pub table_id: String,
    pub column: String,
    pub start: usize,
    pub end: usize,
}

pub struct TableResolver<'a> {
    kg: &'a KnowledgeGraph,
    stop_words: &'a StopWords,
    entries: Vec<RegistryEntry>,
}

impl<'a> TableResolver<'a> {
    pub fn new(kg: &'a KnowledgeGraph, stop_words: &'a StopWords) -> Self {
        let mut entries = Vec::new();
        for node in &kg.nodes {
            let mut push = |text: &str, confidence: f64| {
                let tokens = tokenize(text);
                if tokens.is_empty() || tokens.iter().all(|t| stop_words.contains(t)) {
                    return;
                }
                entries.push(RegistryEntry {
                    tokens,
                    table_id: node.id.clone(),
                    confidence,
                });
            };
            push(&node.name, 1.0);
            push(&node.id, 1.0);
            for alias in &node.aliases {
                push(&alias.text, alias.confidence);
            }
        }
        // Longest first; ties by confidence, then id for determinism.
        entries.sort_by(|a, b| {
            b.tokens
                .len()
                .cmp(&a.tokens.len())
                .then(b.confidence.total_cmp(&a.confidence))
                .then(a.table_id.cmp(&b.table_id))
        });
        Self {
            kg,
            stop_words,
            entries,
        }
    }

    /// Distinct tables in order of first mention.
    pub fn resolve_tables(&self, text: &str) -> Vec<TableMention> {
        let tokens = tokenize(text);
        let mut mentions: Vec<TableMention> = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            if self.stop_words.contains(&tokens[i]) {
                i += 1;
                continue;
            }
            let hit = self.entries.iter().find(|e| {
                tokens.len() - i >= e.tokens.len() && tokens[i..i + e.tokens.len()] == e.tokens[..]
            });
            match hit {
                Some(entry) => {
                    if !mentions.iter().any(|m| m.table_id == entry.table_id) {
                        mentions.push(TableMention {
                            table_id: entry.table_id.clone(),
                            start: i,
                            end: i + entry.tokens.len(),
                        });
                    }
                    i += entry.tokens.len();
                }
                None => i += 1,
            }
        }
        mentions
    }

    /// Columns of `table_id` named in the text, longest match first at each position.
    pub fn resolve_columns(&self, text: &str, table_id: &str, tables: &[TableMention]) -> Vec<ColumnMention> {
        let Some(node) = self.kg.node(table_id) else {
            return Vec::new();
        };
        let tokens = tokenize(text);
        let covered = |pos: usize| tables.iter().any(|m| pos >= m.start && pos < m.end);
        let columns = column_entries(node, self.stop_words);

        let mut mentions = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            if covered(i) || self.stop_words.contains(&tokens[i]) {
                i += 1;
                continue;
            }
            let hit = columns.iter().find(|(col_tokens, _)| {
                tokens.len() - i >= col_tokens.len() && tokens[i..i + col_tokens.len()] == col_tokens[..]
            });
            match hit {
                Some((col_tokens, name)) => {
                    mentions.push(ColumnMention {
                        table_id: node.id.clone(),
                        column: name.clone(),
                        start: i,
                        end: i + col_tokens.len(),
                    });
                    i += col_tokens.len();
                }
                None => i += 1,
            }
        }
        mentions
    }
}

fn column_entries(node: &TableNode, stop_words: &StopWords) -> Vec<(Vec<String>, String)> {
    let mut entries: Vec<(Vec<String>, String)> = node
        .active_columns()
        .map(|c| (tokenize(&c.name), c.name.clone()))
        .filter(|(tokens, _)| !tokens.is_empty() && !tokens.iter().all(|t| stop_words.contains(t)))
        .collect();
    entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    entries
}
