//! # Expression Engine
//!
//! Pure evaluator for declarative, single-key tagged expression trees.
//!
//! An expression is a one-key JSON object whose key is `$var`, `$literal`, or
//! a registered operator name. The operator set is closed and statically
//! enumerated: dispatch is a tagged-variant match resolved at compile time,
//! not an open-ended runtime lookup. Higher-order operators (`$filter`,
//! `$map`) receive the evaluator itself through recursion inside the closed
//! set.
//!
//! ## Semantics
//!
//! - `$literal` returns its operand unevaluated
//! - `$var` resolves `input[key]`; a missing key yields `null`
//! - `$pipe` threads evaluation left-to-right through its sub-expressions
//! - Any other operator recursively evaluates its operand (sequences map
//!   element-wise, plain objects value-wise, scalars pass through), then
//!   applies the operator
//! - Equality is deep structural equality, never identity
//! - Ordering operators require ordinal operands (both numbers or both
//!   strings) with no implicit coercion between them
//! - `$in`/`$nin` test membership via direct sequence containment, with no
//!   deduplication

use crate::types::QuiverError;
use serde_json::Value;
use std::cmp::Ordering;

// =============================================================================
// OPERATOR SET
// =============================================================================

/// The closed operator set, fixed at engine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Var,
    Literal,
    Pipe,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    And,
    Or,
    Not,
    Filter,
    Map,
}

impl Operator {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "$var" => Some(Self::Var),
            "$literal" => Some(Self::Literal),
            "$pipe" => Some(Self::Pipe),
            "$eq" => Some(Self::Eq),
            "$ne" => Some(Self::Ne),
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            "$in" => Some(Self::In),
            "$nin" => Some(Self::Nin),
            "$and" => Some(Self::And),
            "$or" => Some(Self::Or),
            "$not" => Some(Self::Not),
            "$filter" => Some(Self::Filter),
            "$map" => Some(Self::Map),
            _ => None,
        }
    }
}

/// The comparison operator names recognized in constraint position.
const COMPARISON_KEYS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin",
];

fn single_entry(v: &Value) -> Option<(&str, &Value)> {
    match v {
        Value::Object(map) if map.len() == 1 => {
            map.iter().next().map(|(key, operand)| (key.as_str(), operand))
        }
        _ => None,
    }
}

/// True iff `v` is a non-sequence object with exactly one key, and that key
/// is `$var`, `$literal`, or a registered operator name.
pub fn is_expression(v: &Value) -> bool {
    single_entry(v).is_some_and(|(key, _)| Operator::from_key(key).is_some())
}

/// True iff `v` is a single-key comparison operator object (`$eq`, `$ne`,
/// `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`).
///
/// The query evaluator compiles these against a single field value rather
/// than the whole resource.
pub fn is_comparison_expression(v: &Value) -> bool {
    single_entry(v).is_some_and(|(key, _)| COMPARISON_KEYS.contains(&key))
}

// =============================================================================
// EVALUATION
// =============================================================================

/// Evaluate an expression against an input context.
///
/// Fails with `InvalidExpression` if `expr` is not a well-formed single-key
/// expression or an operator is applied outside its domain.
pub fn evaluate(expr: &Value, input: &Value) -> Result<Value, QuiverError> {
    let Some((key, operand)) = single_entry(expr) else {
        return Err(QuiverError::InvalidExpression(format!(
            "not a single-key expression: {expr}"
        )));
    };
    let Some(op) = Operator::from_key(key) else {
        return Err(QuiverError::InvalidExpression(format!(
            "unknown operator '{key}'"
        )));
    };

    match op {
        Operator::Literal => Ok(operand.clone()),
        Operator::Var => resolve_var(operand, input),
        Operator::Pipe => {
            let Value::Array(steps) = operand else {
                return Err(QuiverError::InvalidExpression(
                    "$pipe requires a sequence of expressions".to_string(),
                ));
            };
            let mut acc = input.clone();
            for step in steps {
                acc = evaluate(step, &acc)?;
            }
            Ok(acc)
        }
        Operator::Filter | Operator::Map => apply_iterative(op, operand, input),
        Operator::Eq | Operator::Ne => {
            let args = evaluate_operand(operand, input)?;
            let (a, b) = comparison_operands(&args, input);
            let equal = a == b;
            Ok(Value::Bool(if op == Operator::Eq { equal } else { !equal }))
        }
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let args = evaluate_operand(operand, input)?;
            let (a, b) = comparison_operands(&args, input);
            let ord = ordinal_cmp(a, b)?;
            let pass = match op {
                Operator::Gt => ord == Ordering::Greater,
                Operator::Gte => ord != Ordering::Less,
                Operator::Lt => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            };
            Ok(Value::Bool(pass))
        }
        Operator::In | Operator::Nin => {
            let args = evaluate_operand(operand, input)?;
            let contained = membership(&args, input)?;
            Ok(Value::Bool(if op == Operator::In {
                contained
            } else {
                !contained
            }))
        }
        Operator::And | Operator::Or | Operator::Not => {
            let args = evaluate_operand(operand, input)?;
            apply_logical(op, &args)
        }
    }
}

/// Recursively evaluate an operand: nested expressions evaluate, sequences
/// map element-wise, plain objects map value-wise, scalars pass through.
fn evaluate_operand(operand: &Value, input: &Value) -> Result<Value, QuiverError> {
    if is_expression(operand) {
        return evaluate(operand, input);
    }
    match operand {
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate_operand(item, input))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                out.insert(key.clone(), evaluate_operand(value, input)?);
            }
            Ok(Value::Object(out))
        }
        scalar => Ok(scalar.clone()),
    }
}

fn resolve_var(operand: &Value, input: &Value) -> Result<Value, QuiverError> {
    let Value::String(name) = operand else {
        return Err(QuiverError::InvalidExpression(format!(
            "$var requires a string key, got {operand}"
        )));
    };
    match input {
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        _ => Ok(Value::Null),
    }
}

fn apply_iterative(op: Operator, operand: &Value, input: &Value) -> Result<Value, QuiverError> {
    if !is_expression(operand) {
        return Err(QuiverError::InvalidExpression(format!(
            "{} requires an expression operand",
            if op == Operator::Filter { "$filter" } else { "$map" }
        )));
    }
    let Value::Array(items) = input else {
        return Err(QuiverError::InvalidExpression(format!(
            "{} input must be a sequence",
            if op == Operator::Filter { "$filter" } else { "$map" }
        )));
    };
    let mut out = Vec::new();
    for item in items {
        let result = evaluate(operand, item)?;
        match op {
            Operator::Filter => {
                if is_truthy(&result) {
                    out.push(item.clone());
                }
            }
            _ => out.push(result),
        }
    }
    Ok(Value::Array(out))
}

/// Comparison operators accept the two-element array form `[a, b]`, or the
/// unary form where the operand is compared against the input.
fn comparison_operands<'a>(args: &'a Value, input: &'a Value) -> (&'a Value, &'a Value) {
    if let Value::Array(items) = args {
        if let [a, b] = items.as_slice() {
            return (a, b);
        }
    }
    (input, args)
}

fn ordinal_cmp(a: &Value, b: &Value) -> Result<Ordering, QuiverError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(|| {
                QuiverError::InvalidExpression("incomparable numeric operands".to_string())
            }),
            _ => Err(QuiverError::InvalidExpression(
                "numeric operand out of range".to_string(),
            )),
        },
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(QuiverError::InvalidExpression(format!(
            "ordering operators require two numbers or two strings, got {a} and {b}"
        ))),
    }
}

/// Membership: `[needle, haystack]` tests `needle` against `haystack`;
/// a plain sequence operand tests the input against it.
fn membership(args: &Value, input: &Value) -> Result<bool, QuiverError> {
    if let Value::Array(items) = args {
        if let [needle, Value::Array(haystack)] = items.as_slice() {
            return Ok(haystack.contains(needle));
        }
        return Ok(items.contains(input));
    }
    Err(QuiverError::InvalidExpression(
        "$in/$nin require a sequence operand".to_string(),
    ))
}

fn apply_logical(op: Operator, args: &Value) -> Result<Value, QuiverError> {
    match op {
        Operator::Not => Ok(Value::Bool(!is_truthy(args))),
        _ => {
            let Value::Array(items) = args else {
                return Err(QuiverError::InvalidExpression(
                    "$and/$or require a sequence operand".to_string(),
                ));
            };
            let result = match op {
                Operator::And => items.iter().all(is_truthy),
                _ => items.iter().any(is_truthy),
            };
            Ok(Value::Bool(result))
        }
    }
}

/// Truthiness: `null` and `false` are false, everything else is true.
pub fn is_truthy(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}

// =============================================================================
// COMPILATION
// =============================================================================

/// A validated expression, reusable across inputs.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    expr: Value,
}

impl CompiledExpression {
    /// Evaluate against an input context.
    pub fn run(&self, input: &Value) -> Result<Value, QuiverError> {
        evaluate(&self.expr, input)
    }

    /// Evaluate with the default (empty) context.
    pub fn run_empty(&self) -> Result<Value, QuiverError> {
        self.run(&Value::Object(serde_json::Map::new()))
    }
}

/// Validate and compile an expression.
///
/// Fails with `InvalidExpression` unless `is_expression(expr)` holds.
pub fn compile(expr: &Value) -> Result<CompiledExpression, QuiverError> {
    if !is_expression(expr) {
        return Err(QuiverError::InvalidExpression(format!(
            "not an expression: {expr}"
        )));
    }
    Ok(CompiledExpression { expr: expr.clone() })
}

// =============================================================================
// VARIABLE COLLECTION
// =============================================================================

/// Collect every `$var` key referenced by an expression, skipping `$literal`
/// subtrees. Used by the query evaluator to validate computed group fields.
pub fn var_names(expr: &Value) -> Vec<String> {
    let mut names = Vec::new();
    collect_vars(expr, &mut names);
    names
}

fn collect_vars(v: &Value, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (key, value) in map {
                if key == "$literal" {
                    continue;
                }
                if key == "$var" {
                    if let Value::String(name) = value {
                        out.push(name.clone());
                    }
                    continue;
                }
                collect_vars(value, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_vars(item, out);
            }
        }
        _ => {}
    }
}

// =============================================================================
// TESTS
// =============================================================================
