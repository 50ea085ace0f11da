//! Blob index tags: tag-set validation and tag filter expressions.
//!
//! Filters appear in two places. The `x-ms-if-tags` conditional header
//! accepts the full grammar; a find-by-tags `where` query rejects `OR` and
//! `<>` but may reference the built-in `@container` identifier.
//!
//! ```text
//! expr       := and_expr ( "OR" and_expr )*
//! and_expr   := term ( "AND" term )*
//! term       := "(" expr ")" | key op value
//! key        := bare identifier | "double quoted"
//! value      := 'single quoted', '' escapes a quote
//! op         := = | <> | > | >= | < | <=
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, multispace0, none_of, satisfy},
    combinator::{map, not, value},
    multi::{fold_many0, separated_list1},
    sequence::{delimited, terminated, tuple},
    IResult,
};
use std::collections::{HashMap, HashSet};

use crate::error::{ErrorCode, StorageError, StorageResult};

/// Maximum number of tags on a blob.
pub const MAX_TAGS: usize = 10;
/// Maximum tag key length.
pub const MAX_TAG_KEY_LENGTH: usize = 128;
/// Maximum tag value length.
pub const MAX_TAG_VALUE_LENGTH: usize = 256;

/// Built-in identifier naming the blob's container in `where` queries.
pub const CONTAINER_IDENTIFIER: &str = "@container";

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '+' | '-' | '.' | '/' | ':' | '=' | '_')
}

fn is_bare_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Validates a tag set before it is stored.
pub fn validate_tags(tags: &HashMap<String, String>) -> StorageResult<()> {
    if tags.len() > MAX_TAGS {
        return Err(StorageError::with_message(
            ErrorCode::InvalidTag,
            format!("A blob can have at most {} tags.", MAX_TAGS),
        ));
    }
    for (key, value) in tags {
        if key.is_empty() || key.chars().count() > MAX_TAG_KEY_LENGTH {
            return Err(StorageError::with_message(
                ErrorCode::InvalidTag,
                format!(
                    "Tag key '{}' must be between 1 and {} characters.",
                    key, MAX_TAG_KEY_LENGTH
                ),
            ));
        }
        if value.chars().count() > MAX_TAG_VALUE_LENGTH {
            return Err(StorageError::with_message(
                ErrorCode::InvalidTag,
                format!(
                    "Tag value for '{}' must be at most {} characters.",
                    key, MAX_TAG_VALUE_LENGTH
                ),
            ));
        }
        if !key.chars().all(is_tag_char) || !value.chars().all(is_tag_char) {
            return Err(StorageError::with_message(
                ErrorCode::InvalidTag,
                format!("Tag '{}' contains invalid characters.", key),
            ));
        }
    }
    Ok(())
}

/// Where a filter expression came from; selects grammar and error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// `x-ms-if-tags` conditional header.
    Condition,
    /// Find-by-tags `where` query parameter.
    Where,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ComparisonOp {
    fn holds(&self, left: &str, right: &str) -> bool {
        match self {
            ComparisonOp::Eq => left == right,
            ComparisonOp::Ne => left != right,
            ComparisonOp::Gt => left > right,
            ComparisonOp::Ge => left >= right,
            ComparisonOp::Lt => left < right,
            ComparisonOp::Le => left <= right,
        }
    }
}

/// Parsed tag filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    Or(Vec<TagFilter>),
    And(Vec<TagFilter>),
    Compare {
        key: String,
        op: ComparisonOp,
        value: String,
    },
}

impl TagFilter {
    /// Parses a filter expression.
    pub fn parse(input: &str, mode: FilterMode) -> StorageResult<Self> {
        let (rest, filter) = match or_expr(input) {
            Ok(parsed) => parsed,
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                return Err(filter_error(input, mode, &syntax_error(input, e.input)));
            }
            Err(nom::Err::Incomplete(_)) => {
                return Err(filter_error(input, mode, "incomplete expression"));
            }
        };
        let rest = rest.trim_start();
        if !rest.is_empty() {
            return Err(filter_error(input, mode, &syntax_error(input, rest)));
        }

        filter
            .check(mode)
            .map_err(|reason| filter_error(input, mode, reason))?;

        if mode == FilterMode::Where {
            let mut keys = HashSet::new();
            filter.collect_keys(&mut keys);
            keys.remove(CONTAINER_IDENTIFIER);
            if keys.len() > MAX_TAGS {
                return Err(filter_error(input, mode, "too many distinct tags referenced"));
            }
        }
        Ok(filter)
    }

    /// Evaluates the filter against a tag set. `container` resolves
    /// `@container` in `where` queries.
    ///
    /// A missing tag satisfies only `<>`.
    pub fn matches(&self, tags: &HashMap<String, String>, container: Option<&str>) -> bool {
        match self {
            TagFilter::Or(terms) => terms.iter().any(|t| t.matches(tags, container)),
            TagFilter::And(terms) => terms.iter().all(|t| t.matches(tags, container)),
            TagFilter::Compare { key, op, value } => {
                let current = if key == CONTAINER_IDENTIFIER {
                    container
                } else {
                    tags.get(key).map(String::as_str)
                };
                match current {
                    Some(current) => op.holds(current, value),
                    None => *op == ComparisonOp::Ne,
                }
            }
        }
    }

    /// Rules the grammar alone does not enforce.
    fn check(&self, mode: FilterMode) -> Result<(), &'static str> {
        match self {
            TagFilter::Or(_) if mode == FilterMode::Where => Err("OR is not supported"),
            TagFilter::Or(terms) | TagFilter::And(terms) => {
                terms.iter().try_for_each(|t| t.check(mode))
            }
            TagFilter::Compare { key, op, value } => {
                if key.chars().count() > MAX_TAG_KEY_LENGTH {
                    return Err("tag name is too long");
                }
                if value.chars().count() > MAX_TAG_VALUE_LENGTH {
                    return Err("tag value is too long");
                }
                if key == CONTAINER_IDENTIFIER {
                    if mode != FilterMode::Where {
                        return Err("@container is only supported in where queries");
                    }
                    if *op != ComparisonOp::Eq {
                        return Err("@container only supports '='");
                    }
                }
                if *op == ComparisonOp::Ne && mode == FilterMode::Where {
                    return Err("'<>' is not supported");
                }
                Ok(())
            }
        }
    }

    fn collect_keys<'a>(&'a self, keys: &mut HashSet<&'a str>) {
        match self {
            TagFilter::Or(terms) | TagFilter::And(terms) => {
                terms.iter().for_each(|t| t.collect_keys(keys))
            }
            TagFilter::Compare { key, .. } => {
                keys.insert(key);
            }
        }
    }
}

fn filter_error(input: &str, mode: FilterMode, reason: &str) -> StorageError {
    match mode {
        FilterMode::Condition => StorageError::with_message(
            ErrorCode::InvalidHeaderValue,
            format!("Invalid x-ms-if-tags value '{}': {}.", input, reason),
        ),
        FilterMode::Where => StorageError::with_message(
            ErrorCode::InvalidQueryParameterValue,
            format!("Error parsing query '{}': {}.", input, reason),
        ),
    }
}

/// `rest` is the unparsed tail of `input`.
fn syntax_error(input: &str, rest: &str) -> String {
    let position = input.len().saturating_sub(rest.len()) + 1;
    format!("syntax error at or near character position {}", position)
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

/// Consume optional whitespace around a parser.
fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

/// A case-insensitive keyword that is not the prefix of a longer name.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    ws(terminated(tag_no_case(word), not(satisfy(is_bare_key_char))))
}

/// Collapses a single-term list into the term itself.
fn collapse(mut terms: Vec<TagFilter>, wrap: fn(Vec<TagFilter>) -> TagFilter) -> TagFilter {
    if terms.len() == 1 {
        terms.remove(0)
    } else {
        wrap(terms)
    }
}

fn or_expr(input: &str) -> IResult<&str, TagFilter> {
    map(separated_list1(keyword("OR"), and_expr), |terms| {
        collapse(terms, TagFilter::Or)
    })(input)
}

fn and_expr(input: &str) -> IResult<&str, TagFilter> {
    map(separated_list1(keyword("AND"), term), |terms| {
        collapse(terms, TagFilter::And)
    })(input)
}

fn term(input: &str) -> IResult<&str, TagFilter> {
    ws(alt((
        delimited(char('('), or_expr, char(')')),
        comparison,
    )))(input)
}

fn comparison(input: &str) -> IResult<&str, TagFilter> {
    map(
        tuple((tag_key, ws(comparison_op), quoted_value)),
        |(key, op, value)| TagFilter::Compare { key, op, value },
    )(input)
}

fn tag_key(input: &str) -> IResult<&str, String> {
    alt((
        map(
            delimited(char('"'), take_while1(is_tag_char), char('"')),
            String::from,
        ),
        map(
            terminated(tag(CONTAINER_IDENTIFIER), not(satisfy(is_bare_key_char))),
            String::from,
        ),
        map(take_while1(is_bare_key_char), String::from),
    ))(input)
}

fn comparison_op(input: &str) -> IResult<&str, ComparisonOp> {
    alt((
        value(ComparisonOp::Ne, tag("<>")),
        value(ComparisonOp::Le, tag("<=")),
        value(ComparisonOp::Ge, tag(">=")),
        value(ComparisonOp::Lt, char('<')),
        value(ComparisonOp::Gt, char('>')),
        value(ComparisonOp::Eq, char('=')),
    ))(input)
}

/// Single-quoted value; `''` stands for one quote.
fn quoted_value(input: &str) -> IResult<&str, String> {
    delimited(
        char('\''),
        fold_many0(
            alt((value('\'', tag("''")), none_of("'"))),
            String::new,
            |mut acc, c| {
                acc.push(c);
                acc
            },
        ),
        char('\''),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn condition(expr: &str) -> TagFilter {
        TagFilter::parse(expr, FilterMode::Condition).unwrap()
    }

    #[test]
    fn test_equality_and_inequality() {
        let set = tags(&[("tag1", "val1")]);
        assert!(condition("tag1='val1'").matches(&set, None));
        assert!(!condition("tag1<>'val1'").matches(&set, None));
        assert!(condition("tag1<>'other'").matches(&set, None));
        assert!(condition("missing<>'val1'").matches(&set, None));
        assert!(!condition("missing='val1'").matches(&set, None));
    }

    #[test]
    fn test_and_or_precedence() {
        let set = tags(&[("a", "1"), ("b", "2")]);
        assert!(condition("a='1' AND b='2'").matches(&set, None));
        assert!(!condition("a='1' AND b='3'").matches(&set, None));
        assert!(condition("a='0' OR a='1' AND b='2'").matches(&set, None));
        assert!(!condition("(a='0' OR a='1') AND b='3'").matches(&set, None));
        assert!(condition("a = '1' and \"b\" >= '2'").matches(&set, None));
    }

    #[test]
    fn test_range_operators_are_lexicographic() {
        let set = tags(&[("date", "2024-05-01")]);
        assert!(condition("date > '2024-01-01'").matches(&set, None));
        assert!(condition("date <= '2024-05-01'").matches(&set, None));
        assert!(!condition("date < '2024-05-01'").matches(&set, None));
    }

    #[test]
    fn test_quoted_value_escape() {
        let filter = condition("k='it''s'");
        assert_eq!(
            filter,
            TagFilter::Compare {
                key: "k".into(),
                op: ComparisonOp::Eq,
                value: "it's".into()
            }
        );
    }

    #[test]
    fn test_where_mode_restrictions() {
        let err = TagFilter::parse("a='1' OR b='2'", FilterMode::Where).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidQueryParameterValue);
        let err = TagFilter::parse("a<>'1'", FilterMode::Where).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidQueryParameterValue);

        let filter = TagFilter::parse("@container='logs' AND a='1'", FilterMode::Where).unwrap();
        let set = tags(&[("a", "1")]);
        assert!(filter.matches(&set, Some("logs")));
        assert!(!filter.matches(&set, Some("other")));

        let err = TagFilter::parse("@container='logs'", FilterMode::Condition).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidHeaderValue);
    }

    #[test]
    fn test_syntax_errors() {
        for bad in ["", "a", "a=", "a='1", "a='1' AND", "(a='1'", "a=1", "a='1' b='2'"] {
            assert!(
                TagFilter::parse(bad, FilterMode::Condition).is_err(),
                "expected parse failure for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_keywords_need_a_word_boundary() {
        let set = tags(&[("ORDER", "1"), ("ANDROID", "2")]);
        assert!(condition("ORDER='1' AND ANDROID='2'").matches(&set, None));
        assert!(TagFilter::parse("a='1' ANDb='2'", FilterMode::Condition).is_err());
        assert!(TagFilter::parse("@containers='x'", FilterMode::Where).is_err());
    }

    #[test]
    fn test_nested_groups() {
        let filter = condition(" ( a='1' OR ( b='2' AND c='3' ) ) AND d='4' ");
        let set = tags(&[("b", "2"), ("c", "3"), ("d", "4")]);
        assert!(filter.matches(&set, None));
        assert!(!filter.matches(&tags(&[("b", "2"), ("d", "4")]), None));

        let err = TagFilter::parse("a='1' AND (b='2' OR c='3')", FilterMode::Where).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidQueryParameterValue);
    }

    #[test]
    fn test_validate_tags() {
        validate_tags(&tags(&[("project", "alpha beta"), ("path", "a/b:c=d_e.f+g-h")])).unwrap();

        let too_many: HashMap<_, _> = (0..11).map(|i| (format!("k{}", i), "v".to_string())).collect();
        assert_eq!(validate_tags(&too_many).unwrap_err().code, ErrorCode::InvalidTag);

        let key = "k".repeat(129);
        let long_key = tags(&[(key.as_str(), "v")]);
        assert_eq!(validate_tags(&long_key).unwrap_err().code, ErrorCode::InvalidTag);

        let value = "v".repeat(257);
        let long_value = tags(&[("k", value.as_str())]);
        assert_eq!(validate_tags(&long_value).unwrap_err().code, ErrorCode::InvalidTag);

        let bad_char = tags(&[("k", "semi;colon")]);
        assert_eq!(validate_tags(&bad_char).unwrap_err().code, ErrorCode::InvalidTag);
    }
}
