use chrono::NaiveDate;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use core_lib::schema::{Aggregation, CleaningOp};
use core_lib::value::{Row, Value};
use crate::Context;

///
/// Apply a side's cleaning directives.
///
/// Conversion, trim and date ops run in declaration order; aggregation always runs
/// last. Finally, rows whose key role is null or absent are discarded with a
/// recorded warning - everything downstream may assume a usable key.
///
pub fn clean(ctx: &Context, side_name: &str, ops: &[CleaningOp], mut rows: Vec<Row>) -> Vec<Row> {

    let date_format = ctx.schema().tolerance().date_format().to_string();

    for op in ops {
        match op {
            CleaningOp::DivideBy100 { fields } => {
                // Multiplying by 0.01 keeps two decimal places of scale, so cents
                // divide into amounts that still render as "98.00".
                convert_amounts(ctx, side_name, fields, &mut rows, |amount| amount * Decimal::new(1, 2));
            },

            CleaningOp::MultiplyBy { fields, factor } => {
                let factor = *factor;
                convert_amounts(ctx, side_name, fields, &mut rows, move |amount| amount * factor);
            },

            CleaningOp::TrimWhitespace { fields } => {
                for row in rows.iter_mut() {
                    for field in fields {
                        if let Some(Value::Text(text)) = row.get(field) {
                            let trimmed = text.trim().to_string();
                            row.insert(field.clone(), Value::Text(trimmed));
                        }
                    }
                }
            },

            CleaningOp::DateParse { fields } => {
                for (idx, row) in rows.iter_mut().enumerate() {
                    for field in fields {
                        let current = match row.get(field) {
                            Some(value) if !value.is_null() => value.clone(),
                            _ => continue,
                        };

                        match NaiveDate::parse_from_str(current.display().trim(), &date_format) {
                            Ok(date) => { row.insert(field.clone(), Value::Date(date)); },
                            Err(_) => {
                                ctx.warn(format!("side '{}' row {}: value '{}' in {} does not match date format '{}' - set to null",
                                    side_name, idx + 1, current.display(), field, date_format));
                                row.insert(field.clone(), Value::Null);
                            },
                        }
                    }
                }
            },

            CleaningOp::AggregateDuplicates { .. } => {
                // Applied after every other op, below.
            },
        }
    }

    for op in ops {
        if let CleaningOp::AggregateDuplicates { group_by, aggregations } = op {
            rows = aggregate(ctx, side_name, group_by, aggregations, rows);
        }
    }

    discard_null_keys(ctx, side_name, rows)
}

///
/// Coerce the listed fields to numbers and apply the conversion. Values that don't
/// parse as decimals become null with a warning.
///
fn convert_amounts(
    ctx: &Context,
    side_name: &str,
    fields: &[String],
    rows: &mut [Row],
    convert: impl Fn(Decimal) -> Decimal) {

    for (idx, row) in rows.iter_mut().enumerate() {
        for field in fields {
            let current = match row.get(field) {
                Some(value) if !value.is_null() => value.clone(),
                _ => continue,
            };

            match current.to_number() {
                Some(amount) => { row.insert(field.clone(), Value::Number(convert(amount))); },
                None => {
                    ctx.warn(format!("side '{}' row {}: value '{}' in {} is not a number - set to null",
                        side_name, idx + 1, current.display(), field));
                    row.insert(field.clone(), Value::Null);
                },
            }
        }
    }
}

///
/// Group rows by the group-by role and combine each field per its aggregation,
/// defaulting to 'first'. Produces one row per distinct group value, in first-seen
/// order.
///
fn aggregate(
    ctx: &Context,
    side_name: &str,
    group_by: &str,
    aggregations: &IndexMap<String, Aggregation>,
    rows: Vec<Row>) -> Vec<Row> {

    let mut groups: IndexMap<String, Vec<Row>> = IndexMap::new();
    for row in rows {
        let key = row.get(group_by).map(|value| value.display()).unwrap_or_default();
        groups.entry(key).or_default().push(row);
    }

    groups.into_iter()
        .map(|(_, members)| {
            if members.len() == 1 {
                return members.into_iter().next().expect("group vanished")
            }

            let fields: BTreeSet<String> = members.iter()
                .flat_map(|row| row.keys().cloned())
                .collect();

            let mut combined = Row::new();
            for field in fields {
                let aggregation = aggregations.get(&field).cloned().unwrap_or(Aggregation::First);
                let value = combine(ctx, side_name, &field, &aggregation, &members);
                combined.insert(field, value);
            }
            combined
        })
        .collect()
}

fn combine(ctx: &Context, side_name: &str, field: &str, aggregation: &Aggregation, members: &[Row]) -> Value {
    match aggregation {
        Aggregation::First => members.first()
            .and_then(|row| row.get(field))
            .cloned()
            .unwrap_or(Value::Null),

        Aggregation::Last => members.last()
            .and_then(|row| row.get(field))
            .cloned()
            .unwrap_or(Value::Null),

        Aggregation::Count => Value::Number(Decimal::from(members.len() as i64)),

        Aggregation::Sum | Aggregation::Mean => {
            let numbers = numeric_members(ctx, side_name, field, members);
            if numbers.is_empty() {
                return Value::Null
            }

            let total: Decimal = numbers.iter().sum();
            match aggregation {
                Aggregation::Sum => Value::Number(total),
                _ => Value::Number(total / Decimal::from(numbers.len() as i64)),
            }
        },

        Aggregation::Max | Aggregation::Min => {
            let mut best: Option<Value> = None;
            for row in members {
                let candidate = match row.get(field) {
                    Some(value) if !value.is_null() => value,
                    _ => continue,
                };

                best = match best {
                    None => Some(candidate.clone()),
                    Some(current) => {
                        let keep_candidate = match candidate.compare(&current) {
                            Some(std::cmp::Ordering::Greater) => *aggregation == Aggregation::Max,
                            Some(std::cmp::Ordering::Less) => *aggregation == Aggregation::Min,
                            _ => false,
                        };
                        Some(if keep_candidate { candidate.clone() } else { current })
                    },
                };
            }
            best.unwrap_or(Value::Null)
        },

        Aggregation::Join(separator) => {
            let parts: Vec<String> = members.iter()
                .filter_map(|row| row.get(field))
                .filter(|value| !value.is_null())
                .map(|value| value.display())
                .collect();
            Value::Text(parts.join(separator))
        },
    }
}

fn numeric_members(ctx: &Context, side_name: &str, field: &str, members: &[Row]) -> Vec<Decimal> {
    let mut numbers = vec!();
    for row in members {
        let value = match row.get(field) {
            Some(value) if !value.is_null() => value,
            _ => continue,
        };

        match value.to_number() {
            Some(number) => numbers.push(number),
            None => ctx.warn(format!("side '{}': value '{}' in {} is not a number and was skipped by aggregation",
                side_name, value.display(), field)),
        }
    }
    numbers
}

///
/// Drop rows that end cleaning with no usable key value.
///
fn discard_null_keys(ctx: &Context, side_name: &str, rows: Vec<Row>) -> Vec<Row> {
    let key_role = ctx.schema().key_role();

    rows.into_iter()
        .enumerate()
        .filter(|(idx, row)| {
            let usable = match row.get(key_role) {
                Some(Value::Null) | None => false,
                Some(value) => !value.display().trim().is_empty(),
            };

            if !usable {
                ctx.warn(format!("side '{}' row {}: no value for key role '{}' - row discarded",
                    side_name, idx + 1, key_role));
            }

            usable
        })
        .map(|(_, row)| row)
        .collect()
}
