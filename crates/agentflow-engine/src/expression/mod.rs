//! Expression evaluation for `expression`/`condition` nodes and branch conditions.
//!
//! Graph authors supply small snippets such as `input * 2` or
//! `result === "approved"`. They are evaluated through the
//! [`ExpressionEvaluator`] trait so an embedding application can swap in its
//! own language. The default [`SimpleEvaluator`] accepts a closed grammar:
//!
//! - literals: numbers, `'single'`/`"double"` quoted strings, `true`, `false`, `null`, `undefined`
//! - variables from the scope, member access `a.b`, indexing `a["b"]` / `a[0]`, `.length`
//! - unary `!` `-` `+`, arithmetic `* / % + -`, comparison `< <= > >=`
//! - equality `== != === !==`, logical `&& ||`, ternary `c ? a : b`, parentheses
//!
//! There are no function calls, assignments or statements, so an expression
//! can read the scope it is given and nothing else.

mod eval;
mod lexer;
mod parser;
pub mod value;

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use agentflow_core::config::ExpressionConfig;
use agentflow_core::error::{FlowError, Result};

pub use value::{is_truthy, to_display_string};

/// Variables visible to an expression.
pub type Scope = HashMap<String, Value>;

/// Pluggable expression language.
pub trait ExpressionEvaluator: Send + Sync + 'static {
    /// Evaluate `source` against `scope`.
    fn evaluate(&self, source: &str, scope: &Scope) -> Result<Value>;

    /// Whether `source` refers to the variable `ident`.
    ///
    /// The default scans identifier-shaped words. Evaluators that can parse
    /// `source` should override it, as [`SimpleEvaluator`] does.
    fn mentions(&self, source: &str, ident: &str) -> bool {
        identifier_pattern()
            .find_iter(source)
            .any(|word| word.as_str() == ident)
    }
}

fn identifier_pattern() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| {
        Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*").expect("identifier pattern is valid")
    })
}

/// Default evaluator implementing the grammar described in the module docs.
#[derive(Debug, Clone)]
pub struct SimpleEvaluator {
    max_length: usize,
    max_depth: usize,
}

impl SimpleEvaluator {
    pub fn new(config: &ExpressionConfig) -> Self {
        Self {
            max_length: config.max_length,
            max_depth: config.max_depth,
        }
    }

    fn parse(&self, source: &str) -> Result<parser::Expr> {
        if source.chars().count() > self.max_length {
            return Err(FlowError::Expression(format!(
                "expression longer than {} characters",
                self.max_length
            )));
        }
        let tokens = lexer::tokenize(source)?;
        parser::Parser::new(tokens, self.max_depth).parse()
    }
}

impl Default for SimpleEvaluator {
    fn default() -> Self {
        Self::new(&ExpressionConfig::default())
    }
}

impl ExpressionEvaluator for SimpleEvaluator {
    fn evaluate(&self, source: &str, scope: &Scope) -> Result<Value> {
        let expr = self.parse(source)?;
        eval::eval(&expr, scope)
    }

    fn mentions(&self, source: &str, ident: &str) -> bool {
        match self.parse(source) {
            Ok(expr) => expr.references(ident),
            Err(_) => false,
        }
    }
}
