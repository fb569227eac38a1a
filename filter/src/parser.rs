//! Filter language parser using nom.
//!
//! Parses filters like:
//! - `level = 'error'`
//! - `level=error and service != api`
//! - `labels:app = web or (message contains 'timeout' and not status = 200)`
//! - `message ~ 'conn(ection)? refused'`

use super::ast::{ComparisonOp, Condition, Expr, Filter, Key, LogicalOp, Value};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{eof, map, map_res, opt, peek, recognize, value},
    error::{Error, ErrorKind},
    multi::many0,
    sequence::{pair, preceded},
    IResult, Parser,
};
use thiserror::Error;

/// Errors that can occur during filter parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The filter syntax is invalid.
    #[error("Invalid filter syntax at position {position}: {message}")]
    SyntaxError {
        /// Character offset where parsing stopped.
        position: usize,
        /// Human-readable description.
        message: String,
    },

    /// The filter is empty.
    #[error("Empty filter")]
    EmptyFilter,
}

/// Parses filter text into a [`Filter`].
///
/// # Errors
///
/// Returns a `ParseError` if:
/// - The filter is empty
/// - The syntax is invalid
/// - There is unexpected trailing content
///
/// # Examples
///
/// ```
/// use filter::parse;
///
/// let filter = parse("level = 'error' and labels:app = web").unwrap();
/// assert_eq!(filter.keys().len(), 2);
/// ```
pub fn parse(input: &str) -> Result<Filter, ParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseError::EmptyFilter);
    }

    match expression(trimmed) {
        Ok((remaining, root)) => {
            let rest = remaining.trim();
            if rest.is_empty() {
                Ok(Filter {
                    text: trimmed.to_string(),
                    root,
                })
            } else {
                Err(ParseError::SyntaxError {
                    position: trimmed.len() - remaining.trim_start().len(),
                    message: format!("unexpected trailing content '{}'", snippet(rest)),
                })
            }
        }
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(ParseError::SyntaxError {
            position: trimmed.len() - e.input.len(),
            message: if e.input.is_empty() {
                "unexpected end of filter".to_string()
            } else {
                format!("unexpected input '{}'", snippet(e.input))
            },
        }),
        Err(nom::Err::Incomplete(_)) => Err(ParseError::SyntaxError {
            position: trimmed.len(),
            message: "unexpected end of filter".to_string(),
        }),
    }
}

fn snippet(input: &str) -> String {
    input.chars().take(24).collect()
}

// ============================================================================
// Boolean structure
// ============================================================================

fn expression(input: &str) -> IResult<&str, Expr> {
    or_expression(input)
}

fn or_expression(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expression(input)?;
    let (input, rest) = many0(preceded(
        (multispace1, tag_no_case("or"), multispace1),
        and_expression,
    ))
    .parse(input)?;

    let result = rest.into_iter().fold(first, |left, right| Expr::Combined {
        left: Box::new(left),
        operator: LogicalOp::Or,
        right: Box::new(right),
    });

    Ok((input, result))
}

fn and_expression(input: &str) -> IResult<&str, Expr> {
    let (input, first) = unary_expression(input)?;
    let (input, rest) = many0(preceded(
        (multispace1, tag_no_case("and"), multispace1),
        unary_expression,
    ))
    .parse(input)?;

    let result = rest.into_iter().fold(first, |left, right| Expr::Combined {
        left: Box::new(left),
        operator: LogicalOp::And,
        right: Box::new(right),
    });

    Ok((input, result))
}

fn unary_expression(input: &str) -> IResult<&str, Expr> {
    alt((negated, primary)).parse(input)
}

fn negated(input: &str) -> IResult<&str, Expr> {
    let (input, _) = tag_no_case("not").parse(input)?;
    let (input, _) = alt((multispace1, peek(tag("(")))).parse(input)?;
    let (input, _) = multispace0(input)?;
    let (input, inner) = primary(input)?;
    Ok((input, Expr::Not(Box::new(inner))))
}

fn primary(input: &str) -> IResult<&str, Expr> {
    alt((grouped, map(condition, Expr::Condition))).parse(input)
}

fn grouped(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('(').parse(input)?;
    let (input, _) = multispace0(input)?;
    let (input, expr) = expression(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char(')').parse(input)?;

    Ok((input, Expr::Grouped(Box::new(expr))))
}

fn condition(input: &str) -> IResult<&str, Condition> {
    let (input, key) = key(input)?;
    let (input, _) = multispace0(input)?;
    let (input, operator) = comparison_op(input)?;
    let (input, _) = multispace0(input)?;
    let (input, value) = filter_value(input)?;

    Ok((
        input,
        Condition {
            key: Key::parse(key),
            operator,
            value,
        },
    ))
}

// ============================================================================
// Comparison operators
// ============================================================================

fn comparison_op(input: &str) -> IResult<&str, ComparisonOp> {
    alt((
        value(ComparisonOp::NotEq, alt((tag("!="), tag("<>")))),
        value(ComparisonOp::NotRegex, tag("!~")),
        value(ComparisonOp::Regex, alt((tag("=~"), tag("~")))),
        value(ComparisonOp::LtEq, tag("<=")),
        value(ComparisonOp::GtEq, tag(">=")),
        value(ComparisonOp::Eq, alt((tag("=="), tag("=")))),
        value(ComparisonOp::Lt, char('<')),
        value(ComparisonOp::Gt, char('>')),
        value(
            ComparisonOp::Contains,
            pair(tag_no_case("contains"), multispace1),
        ),
        value(
            ComparisonOp::StartsWith,
            (
                tag_no_case("starts"),
                multispace1,
                tag_no_case("with"),
                multispace1,
            ),
        ),
        value(
            ComparisonOp::EndsWith,
            (
                tag_no_case("ends"),
                multispace1,
                tag_no_case("with"),
                multispace1,
            ),
        ),
    ))
    .parse(input)
}

// ============================================================================
// Value parsers
// ============================================================================

fn filter_value(input: &str) -> IResult<&str, Value> {
    alt((
        string_value,
        terminated_value(float_value),
        terminated_value(integer_value),
        terminated_value(boolean_value),
        bare_value,
    ))
    .parse(input)
}

/// Accepts a literal only when it ends at whitespace, `)` or end of input,
/// so `200ms` is read as a bare word rather than `200` plus garbage.
fn terminated_value<'a>(
    mut inner: impl FnMut(&'a str) -> IResult<&'a str, Value>,
) -> impl FnMut(&'a str) -> IResult<&'a str, Value> {
    move |input| {
        let (rest, parsed) = inner(input)?;
        let (rest, ()) = peek(value_end).parse(rest)?;
        Ok((rest, parsed))
    }
}

fn value_end(input: &str) -> IResult<&str, ()> {
    alt((
        value((), multispace1),
        value((), char(')')),
        value((), eof),
    ))
    .parse(input)
}

fn string_value(input: &str) -> IResult<&str, Value> {
    alt((quoted('\''), quoted('"'))).parse(input)
}

/// Parses a quoted string. `\\` and an escaped quote are unescaped, any other
/// escape is kept verbatim so regular expressions like `\d+` survive.
fn quoted(quote: char) -> impl Fn(&str) -> IResult<&str, Value> {
    move |input: &str| {
        let (mut rest, _) = char(quote).parse(input)?;
        let mut out = String::new();
        loop {
            let mut chars = rest.chars();
            match chars.next() {
                None => {
                    return Err(nom::Err::Error(Error::new(rest, ErrorKind::Char)));
                }
                Some(c) if c == quote => return Ok((chars.as_str(), Value::String(out))),
                Some('\\') => match chars.next() {
                    Some(next) if next == quote || next == '\\' => out.push(next),
                    Some(next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => {
                        return Err(nom::Err::Error(Error::new(rest, ErrorKind::Char)));
                    }
                },
                Some(c) => out.push(c),
            }
            rest = chars.as_str();
        }
    }
}

fn integer_value(input: &str) -> IResult<&str, Value> {
    let (input, num) = map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
        s.parse::<i64>()
    })
    .parse(input)?;
    Ok((input, Value::Integer(num)))
}

fn float_value(input: &str) -> IResult<&str, Value> {
    let (input, num) = map_res(
        recognize((opt(char('-')), digit1, char('.'), digit1)),
        |s: &str| s.parse::<f64>(),
    )
    .parse(input)?;
    Ok((input, Value::Float(num)))
}

fn boolean_value(input: &str) -> IResult<&str, Value> {
    alt((
        value(Value::Boolean(true), tag_no_case("true")),
        value(Value::Boolean(false), tag_no_case("false")),
    ))
    .parse(input)
}

fn bare_value(input: &str) -> IResult<&str, Value> {
    let (input, word) =
        take_while1(|c: char| !c.is_whitespace() && c != ')' && c != '(' && c != '\'' && c != '"')
            .parse(input)?;
    Ok((input, Value::String(word.to_string())))
}

// ============================================================================
// Key parser
// ============================================================================

fn key(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '.' | ':' | '-' | '@' | '/'))
        .parse(input)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn single(filter: &Filter) -> &Condition {
        match &filter.root {
            Expr::Condition(c) => c,
            other => panic!("Expected single condition, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_string_eq() {
        let filter = parse("level = 'error'").unwrap();
        let c = single(&filter);
        assert_eq!(c.key.raw, "level");
        assert_eq!(c.operator, ComparisonOp::Eq);
        assert_eq!(c.value, Value::String("error".to_string()));
    }

    #[test]
    fn test_parse_without_spaces_and_bare_value() {
        let filter = parse("level=error").unwrap();
        let c = single(&filter);
        assert_eq!(c.operator, ComparisonOp::Eq);
        assert_eq!(c.value, Value::String("error".to_string()));
    }

    #[test]
    fn test_parse_double_quoted_string() {
        let filter = parse("service = \"api-gateway\"").unwrap();
        assert_eq!(
            single(&filter).value,
            Value::String("api-gateway".to_string())
        );
    }

    #[test]
    fn test_parse_escaped_quote() {
        let filter = parse(r"message contains 'it\'s down'").unwrap();
        assert_eq!(
            single(&filter).value,
            Value::String("it's down".to_string())
        );
    }

    #[test]
    fn test_unknown_escapes_kept() {
        let filter = parse(r"message ~ 'took \d+ms'").unwrap();
        assert_eq!(
            single(&filter).value,
            Value::String(r"took \d+ms".to_string())
        );
    }

    #[test]
    fn test_parse_empty_string() {
        let filter = parse("message = ''").unwrap();
        assert_eq!(single(&filter).value, Value::String(String::new()));
    }

    #[test]
    fn test_parse_numbers_and_booleans() {
        assert_eq!(
            single(&parse("status_code = 200").unwrap()).value,
            Value::Integer(200)
        );
        assert_eq!(
            single(&parse("delta = -42").unwrap()).value,
            Value::Integer(-42)
        );
        assert_eq!(
            single(&parse("ratio >= 3.5").unwrap()).value,
            Value::Float(3.5)
        );
        assert_eq!(
            single(&parse("success = true").unwrap()).value,
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_number_prefix_is_bare_word() {
        let filter = parse("latency = 200ms").unwrap();
        assert_eq!(single(&filter).value, Value::String("200ms".to_string()));
    }

    #[test]
    fn test_parse_comparison_operators() {
        let operators = vec![
            ("=", ComparisonOp::Eq),
            ("==", ComparisonOp::Eq),
            ("!=", ComparisonOp::NotEq),
            ("<>", ComparisonOp::NotEq),
            ("<", ComparisonOp::Lt),
            ("<=", ComparisonOp::LtEq),
            (">", ComparisonOp::Gt),
            (">=", ComparisonOp::GtEq),
            ("~", ComparisonOp::Regex),
            ("=~", ComparisonOp::Regex),
            ("!~", ComparisonOp::NotRegex),
        ];

        for (op_str, expected_op) in operators {
            let filter = parse(&format!("count {op_str} 10")).unwrap();
            assert_eq!(
                single(&filter).operator,
                expected_op,
                "Failed for operator {op_str}"
            );
        }
    }

    #[test]
    fn test_parse_word_operators() {
        let filter = parse("message CONTAINS 'failed'").unwrap();
        assert_eq!(single(&filter).operator, ComparisonOp::Contains);

        let filter = parse("message starts with 'Error:'").unwrap();
        assert_eq!(single(&filter).operator, ComparisonOp::StartsWith);

        let filter = parse("path ends with .json").unwrap();
        assert_eq!(single(&filter).operator, ComparisonOp::EndsWith);
        assert_eq!(single(&filter).value, Value::String(".json".to_string()));
    }

    #[test]
    fn test_parse_nested_key() {
        let filter = parse("labels:app.kubernetes.io/name = web").unwrap();
        let c = single(&filter);
        assert_eq!(c.key.root(), "labels");
        assert_eq!(c.key.path(), &["app.kubernetes.io/name".to_string()]);
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let filter = parse("a = 1 or b = 2 and c = 3").unwrap();
        match filter.root {
            Expr::Combined {
                operator: LogicalOp::Or,
                right,
                ..
            } => assert!(matches!(
                *right,
                Expr::Combined {
                    operator: LogicalOp::And,
                    ..
                }
            )),
            other => panic!("Expected OR at the root, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_grouping_and_not() {
        let filter = parse("not (level = debug or level = trace) and service = api").unwrap();
        match filter.root {
            Expr::Combined {
                left,
                operator: LogicalOp::And,
                ..
            } => assert!(matches!(*left, Expr::Not(_))),
            other => panic!("Expected AND at the root, got {other:?}"),
        }
        assert!(parse("not(level = debug)").is_ok());
    }

    #[test]
    fn test_mixed_filter_uses_every_value_kind() {
        let filter =
            parse("not (path starts with /api or path ENDS WITH '.js') and ratio >= -1.5 and ok = TRUE")
                .unwrap();
        let keys: Vec<_> = filter.keys().iter().map(|k| k.raw.as_str()).collect();
        assert_eq!(keys, ["path", "path", "ratio", "ok"]);

        let Expr::Combined { left, right, .. } = &filter.root else {
            panic!("Expected AND at the root, got {:?}", filter.root);
        };
        assert!(matches!(
            right.as_ref(),
            Expr::Condition(c) if c.value == Value::Boolean(true)
        ));
        assert!(matches!(
            left.as_ref(),
            Expr::Combined { right, .. }
                if matches!(right.as_ref(), Expr::Condition(c) if c.value == Value::Float(-1.5))
        ));
    }

    #[test]
    fn test_key_starting_with_not() {
        let filter = parse("notes = x").unwrap();
        assert_eq!(single(&filter).key.raw, "notes");
    }

    #[test]
    fn test_case_insensitive_keywords() {
        assert!(parse("a = 1 AND b = 2 Or c = 3").is_ok());
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse("").unwrap_err(), ParseError::EmptyFilter);
        assert_eq!(parse("   ").unwrap_err(), ParseError::EmptyFilter);
    }

    #[test]
    fn test_parse_errors_report_position() {
        let err = parse("level = 'error").unwrap_err();
        assert!(matches!(err, ParseError::SyntaxError { .. }));

        let err = parse("level = error extra").unwrap_err();
        match err {
            ParseError::SyntaxError { position, message } => {
                assert_eq!(position, 14);
                assert!(message.contains("extra"));
            }
            ParseError::EmptyFilter => panic!("unexpected empty filter"),
        }

        assert!(parse("(level = error").is_err());
        assert!(parse("level error").is_err());
        assert!(parse("= error").is_err());
    }

    #[test]
    fn test_display_roundtrip_parses() {
        let filter = parse("(a = 'x y' or b != 2) and not c ~ 'z+'").unwrap();
        let reparsed = parse(&filter.to_string()).unwrap();
        assert_eq!(filter.root, reparsed.root);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        const KEYWORDS: [&str; 6] = ["and", "or", "not", "contains", "starts", "ends"];

        proptest! {
            #[test]
            fn arbitrary_input_never_panics(input in "\\PC{0,60}") {
                let _ = parse(&input);
            }

            #[test]
            fn quoted_values_are_kept_verbatim(
                field in "[a-z][a-z_]{0,8}",
                text in "[^'\\\\]{0,20}",
            ) {
                prop_assume!(!KEYWORDS.contains(&field.as_str()));
                let filter = parse(&format!("{field} = '{text}'")).unwrap();
                let c = single(&filter);
                prop_assert_eq!(&c.key.raw, &field);
                prop_assert_eq!(&c.value, &Value::String(text));
            }
        }
    }
}
