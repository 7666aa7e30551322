use std::cmp::Ordering;

use serde_json::Value;

use agentflow_core::error::{FlowError, Result};

use super::parser::{BinaryOp, Expr, UnaryOp};
use super::value::{add, compare, is_truthy, loose_equals, number, strict_equals, to_number};
use super::Scope;

/// Evaluate a parsed expression against a variable scope.
pub(crate) fn eval(expr: &Expr, scope: &Scope) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::Expression(format!("'{}' is not defined", name))),
        Expr::Member(target, property) => {
            let target = eval(target, scope)?;
            property_of(&target, property)
        }
        Expr::Index(target, index) => {
            let target = eval(target, scope)?;
            let index = eval(index, scope)?;
            match (&target, &index) {
                (Value::Array(items), Value::Number(n)) => Ok(n
                    .as_u64()
                    .and_then(|i| items.get(i as usize))
                    .cloned()
                    .unwrap_or(Value::Null)),
                (_, Value::String(key)) => property_of(&target, key),
                (_, other) => property_of(&target, &super::value::to_display_string(other)),
            }
        }
        Expr::Unary(op, operand) => {
            let value = eval(operand, scope)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!is_truthy(&value)),
                UnaryOp::Neg => number(-to_number(&value)),
                UnaryOp::Plus => number(to_number(&value)),
            })
        }
        Expr::And(lhs, rhs) => {
            let lhs = eval(lhs, scope)?;
            if is_truthy(&lhs) {
                eval(rhs, scope)
            } else {
                Ok(lhs)
            }
        }
        Expr::Or(lhs, rhs) => {
            let lhs = eval(lhs, scope)?;
            if is_truthy(&lhs) {
                Ok(lhs)
            } else {
                eval(rhs, scope)
            }
        }
        Expr::Conditional(cond, then, otherwise) => {
            if is_truthy(&eval(cond, scope)?) {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, scope)?;
            let rhs = eval(rhs, scope)?;
            Ok(binary(*op, &lhs, &rhs))
        }
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    match op {
        BinaryOp::Add => add(lhs, rhs),
        BinaryOp::Sub => number(to_number(lhs) - to_number(rhs)),
        BinaryOp::Mul => number(to_number(lhs) * to_number(rhs)),
        BinaryOp::Div => number(to_number(lhs) / to_number(rhs)),
        BinaryOp::Rem => number(to_number(lhs) % to_number(rhs)),
        BinaryOp::Lt => Value::Bool(compare(lhs, rhs) == Some(Ordering::Less)),
        BinaryOp::Le => Value::Bool(matches!(
            compare(lhs, rhs),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(compare(lhs, rhs) == Some(Ordering::Greater)),
        BinaryOp::Ge => Value::Bool(matches!(
            compare(lhs, rhs),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::EqLoose => Value::Bool(loose_equals(lhs, rhs)),
        BinaryOp::NeLoose => Value::Bool(!loose_equals(lhs, rhs)),
        BinaryOp::EqStrict => Value::Bool(strict_equals(lhs, rhs)),
        BinaryOp::NeStrict => Value::Bool(!strict_equals(lhs, rhs)),
    }
}

fn property_of(target: &Value, property: &str) -> Result<Value> {
    match target {
        Value::Null => Err(FlowError::Expression(format!(
            "cannot read property '{}' of null",
            property
        ))),
        Value::Object(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if property == "length" => Ok(Value::from(items.len())),
        Value::String(s) if property == "length" => Ok(Value::from(s.chars().count())),
        _ => Ok(Value::Null),
    }
}
