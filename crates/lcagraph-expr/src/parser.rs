//! Formula syntax
//!
//! ```text
//! expr   := term (("+" | "-") term)*
//! term   := unary (("*" | "/") unary)*
//! unary  := "-" unary | "+"? power
//! power  := atom (("^" | "**") unary)?
//! atom   := number | ident "(" expr ("," expr)* ")" | ident | "(" expr ")"
//! ```
//!
//! Identifiers follow `[A-Za-z_][A-Za-z0-9_]*`. Function names are only
//! recognized when directly followed by an argument list, so a parameter may be
//! called `log` or `max` without clashing.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char as pchar, digit0, digit1, multispace0, one_of},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value},
    error::ErrorKind,
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use thiserror::Error;

use crate::expr::{BinOp, Expr, Func};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid formula `{formula}`: {message}")]
pub struct ExprParseError {
    pub formula: String,
    pub message: String,
}

/// Parse a textual formula into an [`Expr`].
pub fn parse_expr(text: &str) -> Result<Expr, ExprParseError> {
    let formula = text.trim();
    if formula.is_empty() {
        return Err(ExprParseError {
            formula: formula.to_string(),
            message: "empty formula".to_string(),
        });
    }

    all_consuming(expr)(formula)
        .map(|(_, e)| e)
        .map_err(|err| {
            let message = match err {
                nom::Err::Failure(e) if e.code == ErrorKind::Verify => format!(
                    "unknown function or wrong number of arguments at `{}`",
                    e.input.trim()
                ),
                nom::Err::Error(e) | nom::Err::Failure(e) if e.input.trim().is_empty() => {
                    "unexpected end of formula".to_string()
                }
                nom::Err::Error(e) | nom::Err::Failure(e) => {
                    format!("unexpected input at `{}`", e.input.trim())
                }
                nom::Err::Incomplete(_) => "incomplete formula".to_string(),
            };
            ExprParseError {
                formula: formula.to_string(),
                message,
            }
        })
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_ident_start), take_while(is_ident_continue)))(input)
}

fn expr(input: &str) -> IResult<&str, Expr> {
    let add_op = ws(alt((value(BinOp::Add, pchar('+')), value(BinOp::Sub, pchar('-')))));
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(add_op, term))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, (op, rhs)| Expr::binary(op, acc, rhs)),
    ))
}

fn term(input: &str) -> IResult<&str, Expr> {
    // `*` must not swallow the first half of a `**` power operator
    let mul_op = ws(alt((
        value(BinOp::Mul, terminated(pchar('*'), not(pchar('*')))),
        value(BinOp::Div, pchar('/')),
    )));
    let (input, first) = unary(input)?;
    let (input, rest) = many0(pair(mul_op, unary))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, (op, rhs)| Expr::binary(op, acc, rhs)),
    ))
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(pchar('-')), unary), Expr::neg),
        preceded(opt(ws(pchar('+'))), power),
    ))(input)
}

fn power(input: &str) -> IResult<&str, Expr> {
    let (input, base) = atom(input)?;
    let (input, exponent) = opt(preceded(ws(alt((tag("**"), tag("^")))), unary))(input)?;
    Ok((
        input,
        match exponent {
            Some(exponent) => Expr::binary(BinOp::Pow, base, exponent),
            None => base,
        },
    ))
}

fn atom(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        number,
        call_or_symbol,
        delimited(pchar('('), expr, pchar(')')),
    )))(input)
}

fn number(input: &str) -> IResult<&str, Expr> {
    let exponent = || recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1)));
    map_res(
        alt((
            recognize(tuple((
                digit1,
                opt(pair(pchar('.'), digit0)),
                opt(exponent()),
            ))),
            recognize(tuple((pchar('.'), digit1, opt(exponent())))),
        )),
        |text: &str| text.parse::<f64>().map(Expr::num),
    )(input)
}

fn call_or_symbol(input: &str) -> IResult<&str, Expr> {
    let start = input;
    let (input, name) = parse_ident(input)?;
    let (input, args) = opt(delimited(
        ws(pchar('(')),
        separated_list0(ws(pchar(',')), expr),
        pchar(')'),
    ))(input)?;

    let Some(args) = args else {
        return Ok((input, Expr::sym(name)));
    };
    match Func::from_name(name) {
        Some(func) if func.accepts(args.len()) => Ok((input, Expr::call(func, args))),
        _ => Err(nom::Err::Failure(nom::error::Error::new(
            start,
            ErrorKind::Verify,
        ))),
    }
}
