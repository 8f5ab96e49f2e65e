//! Script capability used by transaction validation.
//!
//! The consensus engine only depends on [`ScriptEngine`]: evaluate a predicate
//! against a transaction under [`ScriptLimits`]. [`PredicateEngine`] is the
//! built-in implementation, a small conjunction-of-comparisons language:
//!
//! ```text
//! timestamp >= 1514764800; outputs <= 2; output_total > 0
//! ```
//!
//! Statements are separated by `;` and all must hold. `true` and `false` are
//! accepted as statements.

use crate::params::ScriptLimits;
use crate::transaction::Transaction;
use std::time::Instant;
use thiserror::Error;

/// Errors that can occur while evaluating a script.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The script exceeded one of its resource ceilings.
    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(&'static str),
    /// The script could not be parsed.
    #[error("malformed statement: {0}")]
    Malformed(String),
    /// A statement referenced an unknown transaction field.
    #[error("unknown field: {0}")]
    UnknownField(String),
}

pub trait ScriptEngine: Send + Sync {
    /// Returns `Ok(true)` when the script holds for `tx`.
    fn evaluate(&self, script: &str, tx: &Transaction, limits: &ScriptLimits) -> Result<bool, ScriptError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PredicateEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    // Two-character operators first so `<=` is not read as `<`.
    const OPERATORS: [(&'static str, Comparison); 6] = [
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    fn apply(&self, lhs: i128, rhs: i128) -> bool {
        match self {
            Comparison::Eq => lhs == rhs,
            Comparison::Ne => lhs != rhs,
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Ge => lhs >= rhs,
        }
    }
}

fn field_value(field: &str, tx: &Transaction) -> Result<i128, ScriptError> {
    match field {
        "timestamp" => Ok(tx.timestamp as i128),
        "inputs" => Ok(tx.inputs.len() as i128),
        "outputs" => Ok(tx.outputs.len() as i128),
        "output_total" => Ok(tx.output_total() as i128),
        other => Err(ScriptError::UnknownField(other.to_string())),
    }
}

fn evaluate_statement(statement: &str, tx: &Transaction) -> Result<bool, ScriptError> {
    match statement {
        "true" => return Ok(true),
        "false" => return Ok(false),
        _ => {}
    }

    for (symbol, comparison) in Comparison::OPERATORS {
        if let Some((lhs, rhs)) = statement.split_once(symbol) {
            let lhs = field_value(lhs.trim(), tx)?;
            let rhs: i128 = rhs
                .trim()
                .parse()
                .map_err(|_| ScriptError::Malformed(statement.to_string()))?;
            return Ok(comparison.apply(lhs, rhs));
        }
    }
    Err(ScriptError::Malformed(statement.to_string()))
}

impl ScriptEngine for PredicateEngine {
    fn evaluate(&self, script: &str, tx: &Transaction, limits: &ScriptLimits) -> Result<bool, ScriptError> {
        if script.len() > limits.max_memory {
            return Err(ScriptError::ResourceExceeded("memory"));
        }

        let statements: Vec<&str> = script
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if statements.len() > limits.max_statements {
            return Err(ScriptError::ResourceExceeded("statements"));
        }

        let started = Instant::now();
        for statement in statements {
            if started.elapsed() > limits.max_cpu_time {
                return Err(ScriptError::ResourceExceeded("cpu time"));
            }
            if !evaluate_statement(statement, tx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
