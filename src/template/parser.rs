use nom::{
    self,
    branch::alt,
    bytes::complete::{tag, take_till},
    character::complete::{alpha1, alphanumeric1, char, multispace0, multispace1},
    combinator::{all_consuming, map, recognize},
    multi::many0_count,
    sequence::{delimited, pair, preceded, tuple},
};

use crate::utils::HttpSimError;

pub(super) const OPEN: &str = "{{";
pub(super) const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Segment {
    Literal(String),
    Field(String)
}

fn identifier(exp: &str) -> nom::IResult<&str, &str> {
    recognize(
        pair(
            alt((alpha1, tag("_"))),
            many0_count(alt((alphanumeric1, tag("_"))))
        )
    )(exp)
}

// .Key
fn next_is_field(exp: &str) -> nom::IResult<&str, String> {
    map(preceded(char('.'), identifier), String::from)(exp)
}

fn next_is_quoted(exp: &str) -> nom::IResult<&str, &str> {
    delimited(char('"'), take_till(|c: char| c == '"'), char('"'))(exp)
}

// index . "any key"
fn next_is_index(exp: &str) -> nom::IResult<&str, String> {
    map(
        preceded(tuple((tag("index"), multispace1, char('.'), multispace1)), next_is_quoted),
        String::from
    )(exp)
}

fn action(exp: &str) -> nom::IResult<&str, String> {
    all_consuming(delimited(multispace0, alt((next_is_field, next_is_index)), multispace0))(exp)
}

fn starts_with_trim_marker(inner: &str) -> bool {
    inner.starts_with('-') && inner[1..].starts_with(char::is_whitespace)
}

fn ends_with_trim_marker(inner: &str) -> bool {
    inner.ends_with('-') && inner[..inner.len() - 1].ends_with(char::is_whitespace)
}

fn push_literal(segments: &mut Vec<Segment>, literal: &str) {
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal.to_string()));
    }
}

pub(super) fn parse(source: &str) -> Result<Vec<Segment>, HttpSimError> {
    let mut segments: Vec<Segment> = Vec::default();
    let mut reminder = source;
    let mut trim_next = false;

    while let Some(open) = reminder.find(OPEN) {
        let offset = source.len() - reminder.len() + open;
        let mut literal = &reminder[..open];
        if trim_next {
            literal = literal.trim_start();
        }

        let after_open = &reminder[open + OPEN.len()..];
        let Some(close) = after_open.find(CLOSE) else {
            let err_str = format!("unclosed action started at offset {}", offset);
            return Err(HttpSimError::Template(err_str));
        };

        let mut inner = &after_open[..close];
        if starts_with_trim_marker(inner) {
            literal = literal.trim_end();
            inner = &inner[1..];
        }

        trim_next = ends_with_trim_marker(inner);
        if trim_next {
            inner = &inner[..inner.len() - 1];
        }

        push_literal(&mut segments, literal);

        let key = match action(inner) {
            Ok((_, key)) => key,
            Err(_) => {
                let err_str = format!("unexpected action '{}{}{}' at offset {}", OPEN, &after_open[..close], CLOSE, offset);
                return Err(HttpSimError::Template(err_str));
            }
        };

        segments.push(Segment::Field(key));
        reminder = &after_open[close + CLOSE.len()..];
    }

    let literal = if trim_next { reminder.trim_start() } else { reminder };
    push_literal(&mut segments, literal);

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Segment { Segment::Literal(s.to_string()) }
    fn field(s: &str) -> Segment { Segment::Field(s.to_string()) }

    #[test]
    fn parses_fields_and_literals() {
        let segments = parse("user={{ .user }}&pass={{.password}}").unwrap();
        assert_eq!(segments, vec![lit("user="), field("user"), lit("&pass="), field("password")]);
    }

    #[test]
    fn parses_index_action() {
        let segments = parse(r#"{{ index . "some string" }}!"#).unwrap();
        assert_eq!(segments, vec![field("some string"), lit("!")]);
    }

    #[test]
    fn trim_markers_eat_whitespace() {
        let segments = parse("a  \n {{- .x -}} \n b").unwrap();
        assert_eq!(segments, vec![lit("a"), field("x"), lit("b")]);
    }

    #[test]
    fn lone_closing_braces_are_literal() {
        let segments = parse("{\"a\": {\"b\": 1}}").unwrap();
        assert_eq!(segments, vec![lit("{\"a\": {\"b\": 1}}")]);
    }

    #[test]
    fn malformed_actions_are_rejected() {
        assert!(matches!(parse("a {{ .user }"), Err(HttpSimError::Template(_))));
        assert!(matches!(parse("{{ user }}"), Err(HttpSimError::Template(_))));
        assert!(matches!(parse("{{ .user extra }}"), Err(HttpSimError::Template(_))));
        assert!(matches!(parse("{{ .1abc }}"), Err(HttpSimError::Template(_))));
    }
}
