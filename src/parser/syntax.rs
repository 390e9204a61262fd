//! Grammar of method-chain queries, parsed with nom into an untyped tree.
//!
//! ```text
//! Products.Where(p => p.Price > $min && p.Name.Contains("a")).OrderBy(p => p.Name).Take(20)
//! ─┬──────  ─┬── ───────────────────┬────────────────────── ───────────┬──────── ───┬───
//!  │         │                      │                                   │           │
//!  │         │                      └── lambda body                     │           └── argument
//!  │         └── sequence operator                                      └── key selector
//!  └── entity set
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, one_of, satisfy},
    combinator::{cut, map, not, opt, peek, recognize, value},
    error::{Error, ErrorKind},
    multi::{separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use rust_decimal::Decimal;

use crate::error::{QueryError, QueryResult};

type PResult<'a, T> = IResult<&'a str, T>;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Long(i64),
    Decimal(Decimal),
    Double(f64),
    Single(f32),
    Str(String),
    Bool(bool),
    Null,
    DateTime(String),
    Guid(String),
}

/// A type reference such as `int`, `Product` or `double?`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeName {
    pub name: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Syntax {
    Literal(Literal),
    Name(String),
    /// `$name`: a caller-supplied variable.
    Variable(String),
    Member {
        target: Box<Syntax>,
        name: String,
    },
    Call {
        target: Box<Syntax>,
        name: String,
        generics: Vec<TypeName>,
        args: Vec<Syntax>,
    },
    Lambda {
        params: Vec<String>,
        body: Box<Syntax>,
    },
    /// `new { a, b = e }`; unnamed members take the name of the member they read.
    Anonymous(Vec<(Option<String>, Syntax)>),
    MemberInit {
        ty: TypeName,
        bindings: Vec<(String, Syntax)>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Syntax>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Syntax>,
        right: Box<Syntax>,
    },
    Conditional {
        test: Box<Syntax>,
        if_true: Box<Syntax>,
        if_false: Box<Syntax>,
    },
    Is {
        operand: Box<Syntax>,
        ty: TypeName,
    },
    As {
        operand: Box<Syntax>,
        ty: TypeName,
    },
    Cast {
        ty: TypeName,
        operand: Box<Syntax>,
    },
}

impl Syntax {
    fn binary(op: BinaryOperator, left: Syntax, right: Syntax) -> Self {
        Syntax::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

/// Parse a complete query expression.
pub fn parse(input: &str) -> QueryResult<Syntax> {
    let lead = input.len() - input.trim_start().len();
    let trimmed = input.trim();
    let offset = |rest: &str| lead + trimmed.len() - rest.len();

    match terminated(expression, multispace0)(trimmed) {
        Ok(("", syntax)) => Ok(syntax),
        Ok((rest, _)) => Err(QueryError::parse(
            offset(rest),
            format!("unexpected trailing input '{}'", rest),
        )),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(QueryError::parse(
            offset(e.input),
            match e.input.chars().next() {
                Some(c) => format!("unexpected '{}' ({:?})", c, e.code),
                None => "unexpected end of input".to_string(),
            },
        )),
        Err(nom::Err::Incomplete(_)) => Err(QueryError::parse(input.len(), "unexpected end of input")),
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn sym<'a>(s: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    preceded(multispace0, tag(s))
}

/// A reserved word not followed by an identifier character.
fn keyword<'a>(k: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    preceded(multispace0, terminated(tag(k), not(satisfy(is_ident_char))))
}

fn identifier(i: &str) -> PResult<'_, &str> {
    preceded(
        multispace0,
        recognize(pair(satisfy(is_ident_start), take_while(is_ident_char))),
    )(i)
}

/// `=` as an assignment, not the start of `==` or `=>`.
fn assign(i: &str) -> PResult<'_, char> {
    preceded(multispace0, terminated(char('='), not(one_of("=>"))))(i)
}

fn type_name(i: &str) -> PResult<'_, TypeName> {
    let (i, name) = identifier(i)?;
    let (i, nullable) = opt(terminated(char('?'), not(char('?'))))(i)?;
    Ok((
        i,
        TypeName {
            name: name.to_string(),
            nullable: nullable.is_some(),
        },
    ))
}

pub(crate) fn expression(i: &str) -> PResult<'_, Syntax> {
    conditional(i)
}

fn conditional(i: &str) -> PResult<'_, Syntax> {
    let (i, test) = coalesce(i)?;
    let Ok((rest, _)) = sym("?")(i) else {
        return Ok((i, test));
    };
    let (rest, if_true) = cut(expression)(rest)?;
    let (rest, _) = cut(sym(":"))(rest)?;
    let (rest, if_false) = cut(expression)(rest)?;
    Ok((
        rest,
        Syntax::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        },
    ))
}

fn coalesce(i: &str) -> PResult<'_, Syntax> {
    let (i, left) = or_expr(i)?;
    match sym("??")(i) {
        Ok((rest, _)) => {
            let (rest, right) = cut(coalesce)(rest)?;
            Ok((rest, Syntax::binary(BinaryOperator::Coalesce, left, right)))
        }
        Err(_) => Ok((i, left)),
    }
}

/// `operand (operator operand)*`, folded to the left.
fn left_assoc<'a>(
    i: &'a str,
    operand: fn(&'a str) -> PResult<'a, Syntax>,
    operator: fn(&'a str) -> PResult<'a, BinaryOperator>,
) -> PResult<'a, Syntax> {
    let (mut i, mut left) = operand(i)?;
    loop {
        match operator(i) {
            Ok((rest, op)) => {
                let (rest, right) = cut(operand)(rest)?;
                left = Syntax::binary(op, left, right);
                i = rest;
            }
            Err(nom::Err::Error(_)) => return Ok((i, left)),
            Err(e) => return Err(e),
        }
    }
}

fn or_expr(i: &str) -> PResult<'_, Syntax> {
    left_assoc(i, and_expr, |i| value(BinaryOperator::Or, sym("||"))(i))
}

fn and_expr(i: &str) -> PResult<'_, Syntax> {
    left_assoc(i, equality, |i| value(BinaryOperator::And, sym("&&"))(i))
}

fn equality(i: &str) -> PResult<'_, Syntax> {
    left_assoc(i, relational, |i| {
        alt((
            value(BinaryOperator::Eq, sym("==")),
            value(BinaryOperator::Ne, sym("!=")),
        ))(i)
    })
}

fn relational_operator(i: &str) -> PResult<'_, BinaryOperator> {
    alt((
        value(BinaryOperator::Le, sym("<=")),
        value(BinaryOperator::Ge, sym(">=")),
        value(BinaryOperator::Lt, sym("<")),
        value(BinaryOperator::Gt, sym(">")),
    ))(i)
}

fn relational(i: &str) -> PResult<'_, Syntax> {
    let (mut i, mut left) = additive(i)?;
    loop {
        if let Ok((rest, _)) = keyword("is")(i) {
            let (rest, ty) = cut(type_name)(rest)?;
            left = Syntax::Is {
                operand: Box::new(left),
                ty,
            };
            i = rest;
            continue;
        }
        if let Ok((rest, _)) = keyword("as")(i) {
            let (rest, ty) = cut(type_name)(rest)?;
            left = Syntax::As {
                operand: Box::new(left),
                ty,
            };
            i = rest;
            continue;
        }
        match relational_operator(i) {
            Ok((rest, op)) => {
                let (rest, right) = cut(additive)(rest)?;
                left = Syntax::binary(op, left, right);
                i = rest;
            }
            Err(nom::Err::Error(_)) => return Ok((i, left)),
            Err(e) => return Err(e),
        }
    }
}

fn additive(i: &str) -> PResult<'_, Syntax> {
    left_assoc(i, multiplicative, |i| {
        alt((
            value(BinaryOperator::Add, sym("+")),
            value(BinaryOperator::Sub, sym("-")),
        ))(i)
    })
}

fn multiplicative(i: &str) -> PResult<'_, Syntax> {
    left_assoc(i, unary, |i| {
        alt((
            value(BinaryOperator::Mul, sym("*")),
            value(BinaryOperator::Div, sym("/")),
            value(BinaryOperator::Mod, sym("%")),
        ))(i)
    })
}

fn unary(i: &str) -> PResult<'_, Syntax> {
    let negated = |op: UnaryOperator| {
        move |operand: Syntax| Syntax::Unary {
            op,
            operand: Box::new(operand),
        }
    };
    alt((
        map(
            preceded(preceded(multispace0, terminated(char('!'), not(char('=')))), unary),
            negated(UnaryOperator::Not),
        ),
        map(preceded(sym("-"), unary), negated(UnaryOperator::Neg)),
        cast,
        postfix,
    ))(i)
}

/// `(T)operand`; only when the parenthesized name is followed by an operand.
fn cast(i: &str) -> PResult<'_, Syntax> {
    let (i, ty) = delimited(sym("("), type_name, sym(")"))(i)?;
    let (i, _) = peek(preceded(
        multispace0,
        satisfy(|c| c.is_alphanumeric() || matches!(c, '_' | '(' | '$' | '\'' | '"' | '!')),
    ))(i)?;
    let (i, operand) = unary(i)?;
    Ok((
        i,
        Syntax::Cast {
            ty,
            operand: Box::new(operand),
        },
    ))
}

fn postfix(i: &str) -> PResult<'_, Syntax> {
    let (mut i, mut e) = primary(i)?;
    loop {
        let Ok((rest, _)) = sym(".")(i) else {
            return Ok((i, e));
        };
        let (rest, name) = cut(identifier)(rest)?;
        let (rest, generics) = opt(generic_arguments)(rest)?;
        let (rest, args) = opt(arguments)(rest)?;
        e = match args {
            Some(args) => Syntax::Call {
                target: Box::new(e),
                name: name.to_string(),
                generics: generics.unwrap_or_default(),
                args,
            },
            None => Syntax::Member {
                target: Box::new(e),
                name: name.to_string(),
            },
        };
        i = rest;
    }
}

/// `<T, U>` directly followed by an argument list.
fn generic_arguments(i: &str) -> PResult<'_, Vec<TypeName>> {
    terminated(
        delimited(sym("<"), separated_list1(sym(","), type_name), sym(">")),
        peek(sym("(")),
    )(i)
}

fn arguments(i: &str) -> PResult<'_, Vec<Syntax>> {
    preceded(
        sym("("),
        cut(terminated(separated_list0(sym(","), argument), sym(")"))),
    )(i)
}

fn argument(i: &str) -> PResult<'_, Syntax> {
    alt((lambda, expression))(i)
}

fn lambda(i: &str) -> PResult<'_, Syntax> {
    let (i, params) = alt((
        map(identifier, |p| vec![p.to_string()]),
        delimited(
            sym("("),
            separated_list0(sym(","), map(identifier, str::to_string)),
            sym(")"),
        ),
    ))(i)?;
    let (i, _) = sym("=>")(i)?;
    let (i, body) = cut(expression)(i)?;
    Ok((
        i,
        Syntax::Lambda {
            params,
            body: Box::new(body),
        },
    ))
}

fn primary(i: &str) -> PResult<'_, Syntax> {
    alt((
        map(literal, Syntax::Literal),
        map(preceded(sym("$"), cut(identifier)), |n| {
            Syntax::Variable(n.to_string())
        }),
        new_expression,
        delimited(sym("("), expression, cut(sym(")"))),
        map(identifier, |n| Syntax::Name(n.to_string())),
    ))(i)
}

fn new_expression(i: &str) -> PResult<'_, Syntax> {
    let (i, _) = keyword("new")(i)?;
    cut(alt((anonymous_body, member_init_body)))(i)
}

fn anonymous_body(i: &str) -> PResult<'_, Syntax> {
    let member = alt((
        map(pair(identifier, preceded(assign, expression)), |(n, e)| {
            (Some(n.to_string()), e)
        }),
        map(expression, |e| (None, e)),
    ));
    map(
        delimited(sym("{"), separated_list0(sym(","), member), sym("}")),
        Syntax::Anonymous,
    )(i)
}

fn member_init_body(i: &str) -> PResult<'_, Syntax> {
    let (i, ty) = type_name(i)?;
    let (i, _) = opt(pair(sym("("), sym(")")))(i)?;
    let binding = map(pair(identifier, preceded(assign, expression)), |(n, e)| {
        (n.to_string(), e)
    });
    let (i, bindings) = delimited(sym("{"), separated_list0(sym(","), binding), sym("}"))(i)?;
    Ok((i, Syntax::MemberInit { ty, bindings }))
}

fn literal(i: &str) -> PResult<'_, Literal> {
    alt((
        value(Literal::Bool(true), keyword("true")),
        value(Literal::Bool(false), keyword("false")),
        value(Literal::Null, keyword("null")),
        map(preceded(sym("datetime"), single_quoted), Literal::DateTime),
        map(preceded(sym("guid"), single_quoted), Literal::Guid),
        map(preceded(multispace0, single_quoted), Literal::Str),
        map(preceded(multispace0, double_quoted), Literal::Str),
        number,
    ))(i)
}

/// `'...'` with `''` standing for one quote.
fn single_quoted(i: &str) -> PResult<'_, String> {
    let (mut i, _) = char('\'')(i)?;
    let mut out = String::new();
    loop {
        let (rest, chunk) = take_while(|c| c != '\'')(i)?;
        out.push_str(chunk);
        let (rest, _) = cut(char('\''))(rest)?;
        match char::<_, Error<&str>>('\'')(rest) {
            Ok((rest, _)) => {
                out.push('\'');
                i = rest;
            }
            Err(_) => return Ok((rest, out)),
        }
    }
}

/// `"..."` with backslash escapes.
fn double_quoted(i: &str) -> PResult<'_, String> {
    let (i, _) = char('"')(i)?;
    let mut out = String::new();
    let mut chars = i.char_indices();
    while let Some((at, c)) = chars.next() {
        match c {
            '"' => return Ok((&i[at + 1..], out)),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, '0')) => out.push('\0'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err(nom::Err::Failure(Error::new(&i[i.len()..], ErrorKind::Char)))
}

fn number(i: &str) -> PResult<'_, Literal> {
    let (i, _) = multispace0(i)?;
    let start = i;
    let (i, text) = recognize(tuple((
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(i)?;
    let (i, suffix) = opt(terminated(one_of("lLmMfFdD"), not(satisfy(is_ident_char))))(i)?;
    let fractional = text.contains(['.', 'e', 'E']);
    let bad = || nom::Err::Failure(Error::new(start, ErrorKind::Digit));
    let lit = match suffix.map(|c| c.to_ascii_lowercase()) {
        Some('l') if !fractional => Literal::Long(text.parse().map_err(|_| bad())?),
        Some('l') => return Err(bad()),
        Some('m') => Literal::Decimal(
            text.parse::<Decimal>()
                .or_else(|_| Decimal::from_scientific(text))
                .map_err(|_| bad())?,
        ),
        Some('f') => Literal::Single(text.parse().map_err(|_| bad())?),
        Some(_) => Literal::Double(text.parse().map_err(|_| bad())?),
        None if fractional => Literal::Double(text.parse().map_err(|_| bad())?),
        None => Literal::Int(text.parse().map_err(|_| bad())?),
    };
    Ok((i, lit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Syntax {
        Syntax::Name(n.to_string())
    }

    fn member(target: Syntax, n: &str) -> Syntax {
        Syntax::Member {
            target: Box::new(target),
            name: n.to_string(),
        }
    }

    #[test]
    fn test_precedence() {
        let parsed = parse("a || b && c == 1 + 2 * 3").unwrap();
        let mul = Syntax::binary(
            BinaryOperator::Mul,
            Syntax::Literal(Literal::Int(2)),
            Syntax::Literal(Literal::Int(3)),
        );
        let add = Syntax::binary(BinaryOperator::Add, Syntax::Literal(Literal::Int(1)), mul);
        let eq = Syntax::binary(BinaryOperator::Eq, name("c"), add);
        let and = Syntax::binary(BinaryOperator::And, name("b"), eq);
        assert_eq!(parsed, Syntax::binary(BinaryOperator::Or, name("a"), and));
    }

    #[test]
    fn test_method_chain_with_lambda() {
        let parsed = parse("Products.Where(p => p.Price > 10).Take(5)").unwrap();
        let Syntax::Call { target, name: take, args, .. } = parsed else {
            panic!("expected call");
        };
        assert_eq!(take, "Take");
        assert_eq!(args, vec![Syntax::Literal(Literal::Int(5))]);
        let Syntax::Call { name: filter, args, .. } = *target else {
            panic!("expected call");
        };
        assert_eq!(filter, "Where");
        let gt = Syntax::binary(
            BinaryOperator::Gt,
            member(name("p"), "Price"),
            Syntax::Literal(Literal::Int(10)),
        );
        assert_eq!(
            args,
            vec![Syntax::Lambda {
                params: vec!["p".to_string()],
                body: Box::new(gt),
            }]
        );
    }

    #[test]
    fn test_two_parameter_lambda_and_anonymous() {
        let parsed = parse("(c, o) => new { c, Total = o.Amount }").unwrap_err();
        assert!(matches!(parsed, QueryError::Parse { .. }));

        let parsed = parse("C.SelectMany(c => c.Orders, (c, o) => new { c, Total = o.Amount })").unwrap();
        let Syntax::Call { args, .. } = parsed else {
            panic!("expected call");
        };
        let Syntax::Lambda { params, body } = &args[1] else {
            panic!("expected lambda");
        };
        assert_eq!(params, &vec!["c".to_string(), "o".to_string()]);
        assert_eq!(
            **body,
            Syntax::Anonymous(vec![
                (None, name("c")),
                (Some("Total".to_string()), member(name("o"), "Amount")),
            ])
        );
    }

    #[test]
    fn test_literals() {
        let lit = |s: &str| match parse(s).unwrap() {
            Syntax::Literal(l) => l,
            other => panic!("not a literal: {:?}", other),
        };
        assert_eq!(lit("42"), Literal::Int(42));
        assert_eq!(lit("42L"), Literal::Long(42));
        assert_eq!(lit("2.5"), Literal::Double(2.5));
        assert_eq!(lit("2.5f"), Literal::Single(2.5));
        assert_eq!(lit("1.25M"), Literal::Decimal(Decimal::new(125, 2)));
        assert_eq!(lit("'O''Neil'"), Literal::Str("O'Neil".to_string()));
        assert_eq!(lit("\"a\\\"b\""), Literal::Str("a\"b".to_string()));
        assert_eq!(lit("datetime'2008-01-02T03:04:05'"), Literal::DateTime("2008-01-02T03:04:05".to_string()));
        assert_eq!(lit("null"), Literal::Null);
    }

    #[test]
    fn test_generic_call_and_cast() {
        let parsed = parse("Products.Cast<Special>()").unwrap();
        assert!(matches!(parsed, Syntax::Call { ref generics, .. } if generics.len() == 1));

        let parsed = parse("(double)p.Id").unwrap();
        assert!(matches!(parsed, Syntax::Cast { ref ty, .. } if ty.name == "double"));

        let parsed = parse("(p.Id) - 1").unwrap();
        assert!(matches!(parsed, Syntax::Binary { op: BinaryOperator::Sub, .. }));
    }

    #[test]
    fn test_conditional_and_type_tests() {
        let parsed = parse("p is Special ? 1 : x ?? 2").unwrap();
        let Syntax::Conditional { test, if_false, .. } = parsed else {
            panic!("expected conditional");
        };
        assert!(matches!(*test, Syntax::Is { .. }));
        assert!(matches!(*if_false, Syntax::Binary { op: BinaryOperator::Coalesce, .. }));
    }

    #[test]
    fn test_error_position() {
        let err = parse("Products.Where(p => p.Price > )").unwrap_err();
        match err {
            QueryError::Parse { position, .. } => assert_eq!(position, 30),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
