use crate::config::StopWordOverrides;
use lazy_static::lazy_static;
use std::collections::HashSet;

lazy_static! {
    static ref DEFAULT_STOP_WORDS: HashSet<&'static str> = [
        "show", "me", "all", "the", "a", "an", "which", "that", "who", "what", "are", "is", "was",
        "were", "be", "in", "not", "and", "or", "of", "for", "from", "to", "with", "without",
        "by", "per", "on", "at", "as", "it", "its", "their", "them", "those", "these", "this",
        "there", "where", "when", "have", "has", "do", "does", "list", "find", "get", "give",
        "display", "return", "please", "rows", "records", "items", "entries", "both", "each",
        "every", "any", "some", "than", "then", "but", "also", "only", "missing", "absent",
        "present", "exist", "exists", "matching", "match", "compare", "between", "how", "many",
        "much", "count", "sum", "total", "average", "avg", "group", "status", "active",
        "inactive", "enabled", "disabled", "equals", "equal", "like", "contains", "greater",
        "less", "more", "fewer", "table", "tables", "column", "columns",
    ]
    .into_iter()
    .collect();

    /// Values that resolve to a filter on the table's status column.
    pub static ref STATUS_WORDS: HashSet<&'static str> = [
        "active", "inactive", "enabled", "disabled", "open", "closed", "pending", "approved",
        "rejected", "cancelled", "completed", "obsolete", "discontinued", "blocked",
    ]
    .into_iter()
    .collect();
}

/// Words never eligible as a table or column candidate.
#[derive(Debug, Clone)]
pub struct StopWords {
    words: HashSet<String>,
}

impl Default for StopWords {
    fn default() -> Self {
        Self {
            words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl StopWords {
    pub fn with_overrides(overrides: &StopWordOverrides) -> Self {
        let mut stop_words = Self::default();
        for word in &overrides.add {
            stop_words.words.insert(word.trim().to_lowercase());
        }
        for word in &overrides.remove {
            stop_words.words.remove(&word.trim().to_lowercase());
        }
        stop_words
    }

    pub fn contains(&self, token: &str) -> bool {
        self.words.contains(&token.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

pub fn is_status_word(token: &str) -> bool {
    STATUS_WORDS.contains(token.to_lowercase().as_str())
}
