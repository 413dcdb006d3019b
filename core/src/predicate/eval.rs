use regex::Regex;
use chrono::NaiveDate;
use std::cmp::Ordering;
use rust_decimal::Decimal;
use crate::value::{Row, Value};
use super::{BinaryOp, Expr, Func, PredicateError, UnaryOp};

///
/// The environment a predicate is evaluated in - one row per side present on the
/// candidate, plus the schema's amount tolerance.
///
/// A reference to a side which is absent (e.g. `finance.amount` for a business-only
/// candidate) or a field the row does not carry resolves to Null. Null then propagates
/// per the language rules: comparisons are false (both-null `==` is true), arithmetic
/// stays Null.
///
pub struct Scope<'a> {
    tolerance: Decimal,
    sides: Vec<(&'a str, &'a Row)>,
}

impl<'a> Scope<'a> {
    pub fn new(tolerance: Decimal) -> Self {
        Self { tolerance, sides: vec!() }
    }

    pub fn with_side(mut self, name: &'a str, row: &'a Row) -> Self {
        self.sides.push((name, row));
        self
    }

    fn lookup(&self, side: &str, field: &str) -> Value {
        self.sides
            .iter()
            .find(|(name, _)| *name == side)
            .and_then(|(_, row)| row.get(field))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

///
/// Evaluate the expression to its final truthiness. This is the entry point rules use.
///
pub fn evaluate_bool(expr: &Expr, scope: &Scope) -> Result<bool, PredicateError> {
    Ok(truthy(&evaluate(expr, scope)?))
}

///
/// Walk the AST producing a Value.
///
pub fn evaluate(expr: &Expr, scope: &Scope) -> Result<Value, PredicateError> {
    match expr {
        Expr::Number(number) => Ok(Value::Number(*number)),
        Expr::Text(text) => Ok(Value::Text(text.clone())),
        Expr::Bool(flag) => Ok(Value::Bool(*flag)),
        Expr::Null => Ok(Value::Null),

        Expr::Reference { side, field } => Ok(scope.lookup(side, field)),

        Expr::Unary { op, expr } => {
            let value = evaluate(expr, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => Ok(match value.to_number() {
                    Some(number) => Value::Number(-number),
                    None => Value::Null,
                }),
            }
        },

        Expr::Binary { op, lhs, rhs } => binary(*op, lhs, rhs, scope),

        Expr::Call { func, args } => call(*func, args, scope),
    }
}

fn binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, scope: &Scope) -> Result<Value, PredicateError> {
    // Boolean operators short-circuit before the rhs is touched.
    match op {
        BinaryOp::And => {
            if !truthy(&evaluate(lhs, scope)?) {
                return Ok(Value::Bool(false))
            }
            return Ok(Value::Bool(truthy(&evaluate(rhs, scope)?)))
        },
        BinaryOp::Or => {
            if truthy(&evaluate(lhs, scope)?) {
                return Ok(Value::Bool(true))
            }
            return Ok(Value::Bool(truthy(&evaluate(rhs, scope)?)))
        },
        _ => {},
    }

    let left = evaluate(lhs, scope)?;
    let right = evaluate(rhs, scope)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(match (left.is_null(), right.is_null()) {
            (true, true) => true,
            (true, false) | (false, true) => false,
            (false, false) => left.equals(&right, scope.tolerance),
        })),

        // Any null operand makes '!=' false - including the both-null case.
        BinaryOp::Ne => Ok(Value::Bool(
            !left.is_null() && !right.is_null() && !left.equals(&right, scope.tolerance)
        )),

        BinaryOp::Lt => Ok(Value::Bool(ordered(&left, &right, &[Ordering::Less]))),
        BinaryOp::Le => Ok(Value::Bool(ordered(&left, &right, &[Ordering::Less, Ordering::Equal]))),
        BinaryOp::Gt => Ok(Value::Bool(ordered(&left, &right, &[Ordering::Greater]))),
        BinaryOp::Ge => Ok(Value::Bool(ordered(&left, &right, &[Ordering::Greater, Ordering::Equal]))),

        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null)
            }
            match (left.to_number(), right.to_number()) {
                (Some(a), Some(b)) => match op {
                    BinaryOp::Add => Ok(Value::Number(a + b)),
                    BinaryOp::Sub => Ok(Value::Number(a - b)),
                    BinaryOp::Mul => Ok(Value::Number(a * b)),
                    BinaryOp::Div => {
                        if b.is_zero() {
                            Err(PredicateError::DivisionByZero)
                        } else {
                            Ok(Value::Number(a / b))
                        }
                    },
                    _ => unreachable!(),
                },
                _ => Ok(Value::Null),
            }
        },

        BinaryOp::Contains => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Bool(false))
            }
            Ok(Value::Bool(left.display().contains(&right.display())))
        },

        BinaryOp::Matches => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Bool(false))
            }
            let pattern = right.display();
            let regex = Regex::new(&pattern)
                .map_err(|source| PredicateError::InvalidRegex { pattern, source })?;
            Ok(Value::Bool(regex.is_match(&left.display())))
        },

        BinaryOp::And | BinaryOp::Or => unreachable!(),
    }
}

fn call(func: Func, args: &[Expr], scope: &Scope) -> Result<Value, PredicateError> {
    match func {
        Func::Abs => {
            let value = evaluate(&args[0], scope)?;
            Ok(match value.to_number() {
                Some(number) => Value::Number(number.abs()),
                None => Value::Null,
            })
        },

        Func::Num => {
            let value = evaluate(&args[0], scope)?;
            Ok(match value.to_number() {
                Some(number) => Value::Number(number),
                None => Value::Null,
            })
        },

        Func::Date => {
            let value = evaluate(&args[0], scope)?;
            let format = evaluate(&args[1], scope)?;
            if value.is_null() || format.is_null() {
                return Ok(Value::Null)
            }
            Ok(match NaiveDate::parse_from_str(value.display().trim(), &format.display()) {
                Ok(date) => Value::Date(date),
                Err(_) => Value::Null,
            })
        },
    }
}

fn ordered(left: &Value, right: &Value, accept: &[Ordering]) -> bool {
    if left.is_null() || right.is_null() {
        return false
    }
    match left.compare(right) {
        Some(ordering) => accept.contains(&ordering),
        None => false,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => !number.is_zero(),
        Value::Text(text) => !text.is_empty(),
        Value::Date(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::parse;

    fn row(cells: &[(&str, Value)]) -> Row {
        cells.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn eval(expr: &str, scope: &Scope) -> bool {
        evaluate_bool(&parse(expr).unwrap(), scope).unwrap()
    }

    #[test]
    fn amount_mismatch_rule_fires() {
        let business = row(&[("amount", Value::Text("100.00".into()))]);
        let finance = row(&[("amount", Value::Number("98.00".parse().unwrap()))]);
        let scope = Scope::new(Decimal::ZERO)
            .with_side("business", &business)
            .with_side("finance", &finance);

        assert!(eval("abs(num(business.amount) - num(finance.amount)) > 1.0", &scope));
        assert!(!eval("abs(num(business.amount) - num(finance.amount)) > 2.0", &scope));
    }

    #[test]
    fn missing_role_evaluates_false_not_error() {
        let business = row(&[]);
        let scope = Scope::new(Decimal::ZERO).with_side("business", &business);

        // Comparisons against the missing field are false in every direction.
        assert!(!eval("business.amount > 0", &scope));
        assert!(!eval("business.amount < 0", &scope));
        assert!(!eval("business.amount == 0", &scope));
        assert!(!eval("business.amount != 0", &scope));
    }

    #[test]
    fn missing_side_resolves_null() {
        let business = row(&[("amount", Value::Text("5".into()))]);
        let scope = Scope::new(Decimal::ZERO).with_side("business", &business);

        assert!(eval("finance.amount == null", &scope));
        assert!(!eval("finance.amount != null", &scope));
    }

    #[test]
    fn null_equality_rules() {
        let business = row(&[("memo", Value::Null)]);
        let scope = Scope::new(Decimal::ZERO).with_side("business", &business);

        assert!(eval("business.memo == null", &scope));
        assert!(!eval("business.memo != null", &scope));
        assert!(!eval("business.memo == 'x'", &scope));
    }

    #[test]
    fn numeric_equality_honours_tolerance() {
        let business = row(&[("amount", Value::Text("100.00".into()))]);
        let finance = row(&[("amount", Value::Number("100.01".parse().unwrap()))]);
        let scope = Scope::new("0.01".parse().unwrap())
            .with_side("business", &business)
            .with_side("finance", &finance);

        // Diff of exactly the tolerance is not a mismatch.
        assert!(eval("business.amount == finance.amount", &scope));
        assert!(!eval("business.amount != finance.amount", &scope));
    }

    #[test]
    fn contains_and_matches() {
        let business = row(&[("customer", Value::Text("TEST account".into()))]);
        let scope = Scope::new(Decimal::ZERO).with_side("business", &business);

        assert!(eval("business.customer contains 'TEST'", &scope));
        assert!(eval("business.customer matches '^TEST'", &scope));
        assert!(!eval("business.customer matches '^account'", &scope));
    }

    #[test]
    fn bad_regex_is_an_error() {
        let business = row(&[("customer", Value::Text("x".into()))]);
        let scope = Scope::new(Decimal::ZERO).with_side("business", &business);
        let expr = parse("business.customer matches '('").unwrap();

        assert!(matches!(evaluate_bool(&expr, &scope), Err(PredicateError::InvalidRegex { .. })));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let scope = Scope::new(Decimal::ZERO);
        let expr = parse("1 / 0 == 1").unwrap();
        assert!(matches!(evaluate_bool(&expr, &scope), Err(PredicateError::DivisionByZero)));
    }

    #[test]
    fn date_function_parses_and_compares() {
        let business = row(&[("date", Value::Text("2025-01-02".into()))]);
        let finance = row(&[("date", Value::Text("2025-01-01".into()))]);
        let scope = Scope::new(Decimal::ZERO)
            .with_side("business", &business)
            .with_side("finance", &finance);

        assert!(eval("date(business.date, '%Y-%m-%d') > date(finance.date, '%Y-%m-%d')", &scope));
        assert!(eval("date(business.date, '%d/%m/%Y') == null", &scope));
    }

    #[test]
    fn arithmetic_propagates_null() {
        let business = row(&[]);
        let scope = Scope::new(Decimal::ZERO).with_side("business", &business);

        assert!(eval("(business.amount + 1) == null", &scope));
    }
}
