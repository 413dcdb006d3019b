mod eval;
mod parser;

pub use eval::{evaluate, evaluate_bool, Scope};
pub use parser::parse;

use thiserror::Error;
use rust_decimal::Decimal;

///
/// The predicate language evaluated against matched pairs and single-side rows.
///
/// Rules are authored as plain text in the schema, parsed once into this AST and then
/// interpreted per candidate. There is deliberately no host-language execution here -
/// the grammar covers value references, literals, comparisons, boolean logic, arithmetic
/// and a small fixed set of functions, and nothing else.
///
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(Decimal),
    Text(String),
    Bool(bool),
    Null,

    /// A `side.role` or `side["header"]` reference.
    Reference { side: String, field: String },

    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Call { func: Func, args: Vec<Expr> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Contains,
    Matches,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Func {
    Abs,
    Num,
    Date,
}

impl Func {
    pub fn arity(&self) -> usize {
        match self {
            Func::Abs => 1,
            Func::Num => 1,
            Func::Date => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Func::Abs => "abs",
            Func::Num => "num",
            Func::Date => "date",
        }
    }
}

impl Expr {
    ///
    /// The fields referenced for the given side, in first-reference order.
    ///
    /// Used to attach the relevant cell values to emitted issues.
    ///
    pub fn referenced_fields(&self, side: &str) -> Vec<String> {
        let mut fields = vec!();
        self.collect_fields(side, &mut fields);
        fields
    }

    fn collect_fields(&self, side: &str, fields: &mut Vec<String>) {
        match self {
            Expr::Reference { side: ref_side, field } => {
                if ref_side == side && !fields.iter().any(|f| f == field) {
                    fields.push(field.clone());
                }
            },
            Expr::Unary { expr, .. } => expr.collect_fields(side, fields),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_fields(side, fields);
                rhs.collect_fields(side, fields);
            },
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_fields(side, fields);
                }
            },
            _ => {},
        }
    }
}

#[derive(Error, Debug)]
pub enum PredicateError {
    #[error("Syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Invalid regular expression '{pattern}'")]
    InvalidRegex { pattern: String, source: regex::Error },

    #[error("Division by zero")]
    DivisionByZero,
}
