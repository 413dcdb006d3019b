use core_lib::predicate::{self, Expr, Scope};
use core_lib::schema::{RuleScope, ValidationRule};
use core_lib::value::Row;
use crate::matching::MatchOutcome;
use crate::report::Issue;
use crate::Context;

///
/// Evaluate the schema's validation rules and emit issues.
///
/// Candidates are scanned pairs-first, then business-only rows, then finance-only
/// rows; rules run in declaration order against each candidate. Every true predicate
/// emits an issue, except that a rule whose issue_type is "skipped" stops any further
/// rules firing on that candidate. A predicate fault skips just that rule for that
/// candidate and records a warning.
///
pub fn evaluate(
    ctx: &Context,
    business_name: &str,
    finance_name: &str,
    business: &[Row],
    finance: &[Row],
    outcome: &MatchOutcome) -> Vec<Issue> {

    // Parse each rule once per task. The schema validator already proved these parse.
    let rules: Vec<(&ValidationRule, Expr)> = ctx.schema()
        .validations()
        .iter()
        .filter_map(|rule| match predicate::parse(rule.condition_expr()) {
            Ok(expr) => Some((rule, expr)),
            Err(err) => {
                ctx.warn(format!("validation '{}' no longer parses and was skipped: {}", rule.name(), err));
                None
            },
        })
        .collect();

    if rules.is_empty() {
        return vec!()
    }

    let mut issues = vec!();

    for pairing in outcome.pairs() {
        let business_row = &business[pairing.business];
        let finance_row = &finance[pairing.finance];
        evaluate_candidate(
            ctx, &rules, RuleScope::Pair, &pairing.key,
            business_name, Some(business_row),
            finance_name, Some(finance_row),
            &mut issues);
    }

    for idx in outcome.business_only() {
        let row = &business[*idx];
        let key = key_display(ctx, row);
        evaluate_candidate(
            ctx, &rules, RuleScope::BusinessOnly, &key,
            business_name, Some(row),
            finance_name, None,
            &mut issues);
    }

    for idx in outcome.finance_only() {
        let row = &finance[*idx];
        let key = key_display(ctx, row);
        evaluate_candidate(
            ctx, &rules, RuleScope::FinanceOnly, &key,
            business_name, None,
            finance_name, Some(row),
            &mut issues);
    }

    log::info!("Validation produced {} issue(s) from {} rule(s)", issues.len(), rules.len());

    issues
}

#[allow(clippy::too_many_arguments)]
fn evaluate_candidate(
    ctx: &Context,
    rules: &[(&ValidationRule, Expr)],
    candidate_scope: RuleScope,
    key: &str,
    business_name: &str,
    business_row: Option<&Row>,
    finance_name: &str,
    finance_row: Option<&Row>,
    issues: &mut Vec<Issue>) {

    let tolerance = ctx.schema().tolerance().amount_diff_max();

    let mut scope = Scope::new(tolerance);
    if let Some(row) = business_row {
        scope = scope.with_side(business_name, row);
    }
    if let Some(row) = finance_row {
        scope = scope.with_side(finance_name, row);
    }

    for (rule, expr) in rules {
        if rule.scope() != candidate_scope {
            continue
        }

        let fired = match predicate::evaluate_bool(expr, &scope) {
            Ok(fired) => fired,
            Err(err) => {
                ctx.warn(format!("validation '{}' failed on key '{}' and was skipped: {}", rule.name(), key, err));
                continue
            },
        };

        if !fired {
            continue
        }

        let detail = render_template(
            rule.detail_template(),
            business_name, business_row,
            finance_name, finance_row);

        issues.push(Issue::new(
            key.to_string(),
            rule.issue_type().to_string(),
            side_value(expr, business_name, business_row),
            side_value(expr, finance_name, finance_row),
            detail));

        // A 'skipped' issue short-circuits the remaining rules for this candidate.
        if rule.issue_type() == "skipped" {
            break
        }
    }
}

///
/// The cell value attached to the issue for one side - the first field of that side
/// the rule's condition references.
///
fn side_value(expr: &Expr, side_name: &str, row: Option<&Row>) -> Option<String> {
    let row = row?;
    let field = expr.referenced_fields(side_name).into_iter().next()?;
    row.get(&field).map(|value| value.display())
}

fn key_display(ctx: &Context, row: &Row) -> String {
    row.get(ctx.schema().key_role())
        .map(|value| value.display())
        .unwrap_or_default()
}

///
/// Substitute {role}, {business.role} and {finance.role} placeholders with the
/// stringified cell values (empty for null). Placeholders that name an unknown side
/// or a field the rows don't carry render literally.
///
fn render_template(
    template: &str,
    business_name: &str,
    business_row: Option<&Row>,
    finance_name: &str,
    finance_row: Option<&Row>) -> String {

    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        rest = &rest[open..];

        let close = match rest.find('}') {
            Some(close) => close,
            None => break, // No closing brace - the remainder is literal.
        };

        let placeholder = &rest[1..close];
        match substitute(placeholder, business_name, business_row, finance_name, finance_row) {
            Some(value) => rendered.push_str(&value),
            None => rendered.push_str(&rest[..=close]),
        }

        rest = &rest[close + 1..];
    }

    rendered.push_str(rest);
    rendered
}

fn substitute(
    placeholder: &str,
    business_name: &str,
    business_row: Option<&Row>,
    finance_name: &str,
    finance_row: Option<&Row>) -> Option<String> {

    match placeholder.split_once('.') {
        Some((side, field)) => {
            let row = if side == business_name {
                business_row
            } else if side == finance_name {
                finance_row
            } else {
                return None // Unknown side renders literally.
            };

            match row {
                // A known side that is absent from this candidate renders empty.
                None => Some(String::new()),
                Some(row) => row.get(field).map(|value| value.display()),
            }
        },
        None => {
            // Bare role: the business row is consulted first, then finance.
            for row in [business_row, finance_row].into_iter().flatten() {
                if let Some(value) = row.get(placeholder) {
                    return Some(value.display())
                }
            }
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_lib::value::Value;

    fn row(cells: &[(&str, &str)]) -> Row {
        cells.iter().map(|(k, v)| (k.to_string(), Value::Text(v.to_string()))).collect()
    }

    #[test]
    fn renders_side_qualified_placeholders() {
        let business = row(&[("amount", "100.00")]);
        let finance = row(&[("amount", "98.00")]);

        let rendered = render_template(
            "biz={business.amount} fin={finance.amount}",
            "business", Some(&business),
            "finance", Some(&finance));

        assert_eq!(rendered, "biz=100.00 fin=98.00");
    }

    #[test]
    fn bare_role_prefers_the_business_row() {
        let business = row(&[("order_id", "A001")]);
        let finance = row(&[("order_id", "F-A001")]);

        let rendered = render_template("key {order_id}", "business", Some(&business), "finance", Some(&finance));
        assert_eq!(rendered, "key A001");
    }

    #[test]
    fn unknown_placeholders_render_literally() {
        let business = row(&[("order_id", "A001")]);

        let rendered = render_template(
            "{nope} and {ledger.x} and {business.missing}",
            "business", Some(&business),
            "finance", None);

        assert_eq!(rendered, "{nope} and {ledger.x} and {business.missing}");
    }

    #[test]
    fn absent_side_renders_empty_for_known_placeholder() {
        let business = row(&[("order_id", "A001")]);

        let rendered = render_template(
            "fin=[{finance.order_id}]",
            "business", Some(&business),
            "finance", None);

        assert_eq!(rendered, "fin=[]");
    }

    #[test]
    fn null_values_render_empty() {
        let mut business = row(&[]);
        business.insert("amount".into(), Value::Null);

        let rendered = render_template("[{business.amount}]", "business", Some(&business), "finance", None);
        assert_eq!(rendered, "[]");
    }

    #[test]
    fn unterminated_brace_is_literal() {
        let business = row(&[("order_id", "A001")]);
        let rendered = render_template("oops {order_id", "business", Some(&business), "finance", None);
        assert_eq!(rendered, "oops {order_id");
    }
}
