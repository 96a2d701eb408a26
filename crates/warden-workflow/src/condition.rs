//! A small, deliberately inexpressive boolean expression language for
//! `CONDITION`/`LOOP` steps. Grammar:
//!
//! ```text
//! expr       := or_expr
//! or_expr    := and_expr ("or" and_expr)*
//! and_expr   := unary ("and" unary)*
//! unary      := "not" unary | group | comparison
//! group      := "(" or_expr ")"
//! comparison := operand (("==" | "!=" | "<=" | ">=" | "<" | ">") operand)?
//! operand    := number | string | "true" | "false" | identifier
//! ```
//!
//! There is no function call, indexing, attribute access or arithmetic —
//! only literals, context variable lookups and comparisons. A step
//! condition can never do anything but read the running context and
//! produce a bool, so there is nothing here for an adversarial template
//! author to exploit.

use std::collections::HashMap;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, alphanumeric1, char, digit1, multispace0};
use nom::combinator::{map, map_res, opt, recognize, value};
use nom::multi::{many0, many0_count};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Str(String),
    Bool(bool),
    Ident(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Operand, CmpOp, Operand),
    Truthy(Operand),
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn parse_identifier(input: &str) -> IResult<&str, String> {
    map(recognize(pair(alt((alpha1, tag("_"))), many0_count(alt((alphanumeric1, tag("_")))))), String::from)(input)
}

fn parse_number(input: &str) -> IResult<&str, f64> {
    map_res(recognize(tuple((opt(char('-')), digit1, opt(pair(char('.'), digit1))))), |s: &str| s.parse::<f64>())(input)
}

fn parse_string(input: &str) -> IResult<&str, String> {
    alt((
        map(delimited(char('"'), nom::bytes::complete::take_while(|c| c != '"'), char('"')), String::from),
        map(delimited(char('\''), nom::bytes::complete::take_while(|c| c != '\''), char('\'')), String::from),
    ))(input)
}

fn parse_bool(input: &str) -> IResult<&str, bool> {
    alt((value(true, tag("true")), value(false, tag("false"))))(input)
}

fn parse_operand(input: &str) -> IResult<&str, Operand> {
    ws(alt((
        map(parse_bool, Operand::Bool),
        map(parse_number, Operand::Number),
        map(parse_string, Operand::Str),
        map(parse_identifier, Operand::Ident),
    )))(input)
}

fn parse_cmp_op(input: &str) -> IResult<&str, CmpOp> {
    ws(alt((
        value(CmpOp::Eq, tag("==")),
        value(CmpOp::NotEq, tag("!=")),
        value(CmpOp::LtEq, tag("<=")),
        value(CmpOp::GtEq, tag(">=")),
        value(CmpOp::Lt, tag("<")),
        value(CmpOp::Gt, tag(">")),
    )))(input)
}

fn parse_comparison(input: &str) -> IResult<&str, Expr> {
    map(tuple((parse_operand, opt(pair(parse_cmp_op, parse_operand)))), |(lhs, rest)| match rest {
        Some((op, rhs)) => Expr::Compare(lhs, op, rhs),
        None => Expr::Truthy(lhs),
    })(input)
}

fn parse_group(input: &str) -> IResult<&str, Expr> {
    delimited(ws(char('(')), parse_or, ws(char(')')))(input)
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    alt((map(preceded(ws(tag("not")), parse_unary), |e| Expr::Not(Box::new(e))), parse_group, parse_comparison))(input)
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_unary(input)?;
    let (input, rest) = many0(preceded(ws(tag("and")), parse_unary))(input)?;
    Ok((input, rest.into_iter().fold(first, |acc, next| Expr::And(Box::new(acc), Box::new(next)))))
}

fn parse_or(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_and(input)?;
    let (input, rest) = many0(preceded(ws(tag("or")), parse_and))(input)?;
    Ok((input, rest.into_iter().fold(first, |acc, next| Expr::Or(Box::new(acc), Box::new(next)))))
}

fn parse_expr(input: &str) -> Option<Expr> {
    let (remaining, expr) = parse_or(input).ok()?;
    if remaining.trim().is_empty() {
        Some(expr)
    } else {
        None
    }
}

fn resolve(operand: &Operand, context: &HashMap<String, Value>) -> Value {
    match operand {
        Operand::Number(n) => Value::from(*n),
        Operand::Str(s) => Value::String(s.clone()),
        Operand::Bool(b) => Value::Bool(*b),
        Operand::Ident(name) => context.get(name).cloned().unwrap_or(Value::Null),
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
}

fn compare(lhs: &Value, op: CmpOp, rhs: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_f64(lhs), as_f64(rhs)) {
        return match op {
            CmpOp::Eq => a == b,
            CmpOp::NotEq => a != b,
            CmpOp::Lt => a < b,
            CmpOp::LtEq => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::GtEq => a >= b,
        };
    }
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::NotEq => lhs != rhs,
        // Ordering comparisons between non-numeric operands are never true;
        // a malformed condition should fail closed, not throw.
        _ => false,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn eval(expr: &Expr, context: &HashMap<String, Value>) -> bool {
    match expr {
        Expr::Or(a, b) => eval(a, context) || eval(b, context),
        Expr::And(a, b) => eval(a, context) && eval(b, context),
        Expr::Not(a) => !eval(a, context),
        Expr::Compare(lhs, op, rhs) => compare(&resolve(lhs, context), *op, &resolve(rhs, context)),
        Expr::Truthy(op) => truthy(&resolve(op, context)),
    }
}

/// Evaluates a condition expression against the running workflow context.
/// A syntax error or an expression referencing nothing evaluable returns
/// `false` rather than propagating an error — a misconfigured condition
/// should skip the branch, not abort the workflow.
pub fn evaluate(condition: &str, context: &HashMap<String, Value>) -> bool {
    match parse_expr(condition) {
        Some(expr) => eval(&expr, context),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn numeric_comparison_against_context_variable() {
        let context = ctx(&[("eval_score", Value::from(0.82))]);
        assert!(evaluate("eval_score >= 0.75", &context));
        assert!(!evaluate("eval_score >= 0.95", &context));
    }

    #[test]
    fn boolean_and_or_not_compose() {
        let context = ctx(&[("score", Value::from(0.9)), ("retries", Value::from(1))]);
        assert!(evaluate("score >= 0.8 and retries < 3", &context));
        assert!(evaluate("not (score < 0.5) or retries > 10", &context));
        assert!(!evaluate("score < 0.5 and retries > 10", &context));
    }

    #[test]
    fn parenthesized_group_changes_precedence() {
        let context = ctx(&[("score", Value::from(0.3)), ("retries", Value::from(0))]);
        assert!(evaluate("(score >= 0.8 or retries == 0) and not (retries > 5)", &context));
        assert!(!evaluate("score >= 0.8 or (retries == 0 and retries > 5)", &context));
    }

    #[test]
    fn string_equality_and_truthy_identifier() {
        let context = ctx(&[("status", Value::String("approved".into())), ("flag", Value::Bool(true))]);
        assert!(evaluate("status == 'approved'", &context));
        assert!(evaluate("flag", &context));
    }

    #[test]
    fn unparseable_or_unbound_condition_fails_closed() {
        let context = HashMap::new();
        assert!(!evaluate("eval_score >=", &context));
        assert!(!evaluate("eval_score >= 0.5", &context));
    }
}
