//! String filter parser.
//!
//! Grammar (RFC 4515, extended with `<`, `>` and `<>`):
//!
//! ```text
//! filter     = "(" filtercomp ")"
//! filtercomp = "&" filter+ | "|" filter+ | "!" filter | item
//! item       = attr op value
//! op         = "=" | "~=" | "<=" | ">=" | "<" | ">" | "<>"
//! ```
//!
//! `attr=*` is a presence filter and `=` values containing an unescaped `*`
//! are substring filters. A bare `item` without parentheses is accepted.

use crate::error::MappingError;
use crate::filter::Filter;
use crate::value::Operator;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char as pchar, multispace0},
    combinator::{all_consuming, map},
    multi::many1,
    sequence::{delimited, preceded, tuple},
    IResult,
};

pub fn parse_filter(text: &str) -> Result<Filter, MappingError> {
    let trimmed = text.trim();
    let result = if trimmed.starts_with('(') {
        all_consuming(filter)(trimmed)
    } else {
        all_consuming(item)(trimmed)
    };
    match result {
        Ok((_, filter)) => Ok(filter),
        Err(err) => Err(MappingError::InvalidFilter {
            filter: text.to_string(),
            message: match err {
                nom::Err::Error(e) | nom::Err::Failure(e) => {
                    format!("unexpected input at `{}`", truncate(e.input, 24))
                }
                nom::Err::Incomplete(_) => "incomplete input".to_string(),
            },
        }),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn filter(input: &str) -> IResult<&str, Filter> {
    delimited(
        tuple((multispace0, pchar('('), multispace0)),
        alt((and, or, not, item)),
        tuple((multispace0, pchar(')'), multispace0)),
    )(input)
}

fn and(input: &str) -> IResult<&str, Filter> {
    map(preceded(pchar('&'), many1(filter)), |children| Filter::And {
        children,
    })(input)
}

fn or(input: &str) -> IResult<&str, Filter> {
    map(preceded(pchar('|'), many1(filter)), |children| Filter::Or {
        children,
    })(input)
}

fn not(input: &str) -> IResult<&str, Filter> {
    map(preceded(pchar('!'), filter), Filter::not)(input)
}

fn attribute(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ';' | '_'))(input)
}

fn operator(input: &str) -> IResult<&str, &str> {
    alt((
        tag("~="),
        tag("<="),
        tag(">="),
        tag("<>"),
        tag("="),
        tag("<"),
        tag(">"),
    ))(input)
}

fn item(input: &str) -> IResult<&str, Filter> {
    let (rest, (attr, _, op, _, raw)) = tuple((
        attribute,
        multispace0,
        operator,
        multispace0,
        take_while(|c: char| c != ')' && c != '('),
    ))(input)?;

    let attr = attr.to_string();
    let raw = raw.trim_end();
    let Some(operator) = Operator::parse(op) else {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    };

    if op != "=" {
        return Ok((rest, Filter::simple(attr, operator, unescape(raw))));
    }
    if raw == "*" {
        return Ok((rest, Filter::present(attr)));
    }

    // Split on unescaped `*`; escaped stars are `\2a` and never appear raw.
    let parts: Vec<&str> = raw.split('*').collect();
    if parts.len() == 1 {
        return Ok((rest, Filter::equal(attr, unescape(raw))));
    }

    let initial = Some(parts[0]).filter(|p| !p.is_empty()).map(unescape);
    let last = parts
        .last()
        .copied()
        .filter(|p| !p.is_empty())
        .map(unescape);
    let any = parts[1..parts.len() - 1]
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| unescape(p))
        .collect();
    Ok((
        rest,
        Filter::Substring {
            attribute: attr,
            initial,
            any,
            last,
        },
    ))
}

fn unescape(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(b) = hex {
                out.push(b);
                i += 3;
                continue;
            }
            if let Some(&next) = bytes.get(i + 1) {
                out.push(next);
                i += 2;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
