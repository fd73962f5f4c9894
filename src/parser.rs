// ABOUTME: Reader module parsing S-expression source text with nom combinators

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    IResult, Parser,
};

use crate::config::MAX_TOKEN_LEN;
use crate::error::Error;
use crate::heap::{GcRef, Heap};

/// Intermediate syntax tree produced by the grammar before the forms are
/// allocated on the heap.
#[derive(Debug, Clone, PartialEq)]
enum Syntax {
    Int(i64),
    Symbol(String),
    List(Vec<Syntax>),
    Quote(Box<Syntax>),
}

fn is_token_char(c: char) -> bool {
    !c.is_whitespace() && c != '(' && c != ')' && c != '\''
}

/// Parse a maximal run of token characters and classify it as an integer
/// literal or a symbol. An integer literal is an optional leading `-`
/// followed by digits; any other token, including one whose digits overflow
/// a signed 64-bit integer, is a symbol.
fn parse_atom(input: &str) -> IResult<&str, Syntax> {
    let (rest, token) = take_while1(is_token_char)(input)?;
    if token.len() > MAX_TOKEN_LEN {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TooLarge,
        )));
    }

    let digits = token.strip_prefix('-').unwrap_or(token);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(value) = token.parse::<i64>() {
            return Ok((rest, Syntax::Int(value)));
        }
    }
    Ok((rest, Syntax::Symbol(token.to_string())))
}

/// Parse a quoted expression: 'expr -> (quote expr)
fn parse_quote(input: &str) -> IResult<&str, Syntax> {
    let (input, _) = char('\'')(input)?;
    let (input, expr) = parse_expr(input)?;
    Ok((input, Syntax::Quote(Box::new(expr))))
}

/// Parse a list: (expr1 expr2 ...). Running out of input before the closing
/// paren is a malformed list.
fn parse_list(input: &str) -> IResult<&str, Syntax> {
    let (input, _) = char('(')(input)?;

    let mut items = Vec::new();
    let mut remaining = input;

    loop {
        let (rest, _) = multispace0::<_, nom::error::Error<_>>(remaining)?;
        if let Ok((rest, _)) = char::<_, nom::error::Error<_>>(')')(rest) {
            return Ok((rest, Syntax::List(items)));
        }
        if rest.is_empty() {
            return Err(nom::Err::Failure(nom::error::Error::new(
                rest,
                nom::error::ErrorKind::Char,
            )));
        }

        let (rest, expr) = parse_expr(rest)?;
        items.push(expr);
        remaining = rest;
    }
}

/// Main expression parser - tries all alternatives
fn parse_expr(input: &str) -> IResult<&str, Syntax> {
    let (input, _) = multispace0(input)?;
    alt((parse_quote, parse_list, parse_atom)).parse(input)
}

/// Read every top-level form and wrap the sequence with the `progn` symbol
/// so a source file evaluates front to back. Empty input reads as nil.
pub fn read_program(heap: &mut Heap, input: &str) -> Result<GcRef, Error> {
    let forms = parse_all(input)?;
    let nil = heap.reserved.nil;
    if forms.is_empty() {
        return Ok(nil);
    }

    let mut list = nil;
    for form in forms.iter().rev() {
        let value = lower(heap, form);
        list = heap.cons(value, list);
    }
    let progn = heap.reserved.progn;
    Ok(heap.cons(progn, list))
}

/// Read a single form; empty input reads as nil.
pub fn read(heap: &mut Heap, input: &str) -> Result<GcRef, Error> {
    let trimmed = input.trim_start();
    if trimmed.is_empty() {
        return Ok(heap.reserved.nil);
    }
    match parse_expr(trimmed) {
        Ok((_, form)) => Ok(lower(heap, &form)),
        Err(err) => Err(syntax_error(err)),
    }
}

fn parse_all(input: &str) -> Result<Vec<Syntax>, Error> {
    let mut forms = Vec::new();
    let mut remaining = input;
    loop {
        remaining = remaining.trim_start();
        if remaining.is_empty() {
            return Ok(forms);
        }
        if remaining.starts_with(')') {
            return Err(Error::Syntax("malformed list".to_string()));
        }
        match parse_expr(remaining) {
            Ok((rest, form)) => {
                forms.push(form);
                remaining = rest;
            }
            Err(err) => return Err(syntax_error(err)),
        }
    }
}

fn syntax_error(err: nom::Err<nom::error::Error<&str>>) -> Error {
    match err {
        nom::Err::Failure(e) if e.code == nom::error::ErrorKind::TooLarge => {
            Error::Syntax("token exceeds the maximum token length".to_string())
        }
        nom::Err::Failure(e) if e.code == nom::error::ErrorKind::Char => {
            Error::Syntax("malformed list".to_string())
        }
        _ => Error::Syntax("malformed expression".to_string()),
    }
}

/// Allocate a parsed form on the heap, interning symbols as they appear.
fn lower(heap: &mut Heap, form: &Syntax) -> GcRef {
    match form {
        Syntax::Int(value) => heap.alloc_int(*value),
        Syntax::Symbol(name) => heap.intern(name),
        Syntax::Quote(inner) => {
            let nil = heap.reserved.nil;
            let quote = heap.reserved.quote;
            let value = lower(heap, inner);
            let tail = heap.cons(value, nil);
            heap.cons(quote, tail)
        }
        Syntax::List(items) => {
            let mut list = heap.reserved.nil;
            for item in items.iter().rev() {
                let value = lower(heap, item);
                list = heap.cons(value, list);
            }
            list
        }
    }
}
