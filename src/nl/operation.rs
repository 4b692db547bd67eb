use super::{AggregateFunction, Classification, Operation};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NOT_IN: Regex = Regex::new(r"(?i)\bnot\s+(?:in|present\s+in|found\s+in)\b|\bmissing\b|\babsent\b|\bbut\s+not\b").unwrap();
    static ref IN_BOTH: Regex = Regex::new(r"(?i)\bin\s+both\b|\bmatching\b|\bpresent\s+in\s+both\b").unwrap();
    static ref EQUALS: Regex = Regex::new(r"(?i)\bequals?\b|\bequal\s+to\b|\bsame\s+as\b|(?:^|[^<>!])=").unwrap();
    static ref CONTAINS: Regex = Regex::new(r"(?i)\bcontains?\b|\blike\b").unwrap();
    static ref AGGREGATE: Regex = Regex::new(r"(?i)\b(?:count|how\s+many|sum|total|average|avg|mean|group\s+by|minimum|maximum|number\s+of)\b").unwrap();
    static ref SUM_FN: Regex = Regex::new(r"(?i)\b(?:sum|total)\b").unwrap();
    static ref AVG_FN: Regex = Regex::new(r"(?i)\b(?:average|avg|mean)\b").unwrap();
    static ref MAX_FN: Regex = Regex::new(r"(?i)\b(?:max|maximum|highest|largest)\b").unwrap();
    static ref MIN_FN: Regex = Regex::new(r"(?i)\b(?:min|minimum|lowest|smallest)\b").unwrap();
}

/// Deterministic operation detection. An aggregation classification always
/// yields `Aggregate` so comparative filters inside it do not turn it into `Equals`.
pub fn detect_operation(text: &str, classification: Classification) -> Operation {
    if classification == Classification::AggregationQuery {
        return Operation::Aggregate;
    }
    if NOT_IN.is_match(text) {
        Operation::NotIn
    } else if IN_BOTH.is_match(text) {
        Operation::In
    } else if EQUALS.is_match(text) {
        Operation::Equals
    } else if CONTAINS.is_match(text) {
        Operation::Contains
    } else if AGGREGATE.is_match(text) {
        Operation::Aggregate
    } else {
        Operation::In
    }
}

/// Two-table operations need a join target.
pub fn needs_target(operation: Operation, classification: Classification) -> bool {
    match operation {
        Operation::NotIn => true,
        Operation::In => classification == Classification::ComparisonQuery,
        _ => false,
    }
}

pub fn detect_aggregate_function(text: &str) -> AggregateFunction {
    if AVG_FN.is_match(text) {
        AggregateFunction::Avg
    } else if SUM_FN.is_match(text) {
        AggregateFunction::Sum
    } else if MAX_FN.is_match(text) {
        AggregateFunction::Max
    } else if MIN_FN.is_match(text) {
        AggregateFunction::Min
    } else {
        AggregateFunction::Count
    }
}
