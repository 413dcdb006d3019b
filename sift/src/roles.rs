use std::path::Path;
use core_lib::{schema::Side, value::{Row, Value}};
use crate::{error::SiftError, model::RawTable};

///
/// Map a file's columns onto canonical roles and build the side's rows.
///
/// For each declared role the alias list is walked in order; the first alias equal
/// to a header (exact match, after trimming) claims that column. A column claims at
/// most one role. Columns no role claims are preserved under their original header
/// so validation rules can still reach them.
///
pub fn resolve(side_name: &str, side: &Side, key_role: &str, table: &RawTable, path: &Path) -> Result<Vec<Row>, SiftError> {

    let headers = table.headers();
    let mut column_roles: Vec<Option<String>> = vec![None; headers.len()];

    for (role, aliases) in side.field_roles() {
        'aliases: for alias in aliases.as_slice() {
            for (idx, header) in headers.iter().enumerate() {
                if column_roles[idx].is_none() && header == alias.trim() {
                    column_roles[idx] = Some(role.clone());
                    break 'aliases
                }
            }
        }
    }

    let key_resolved = column_roles.iter()
        .any(|role| role.as_deref() == Some(key_role));

    if !key_resolved {
        return Err(SiftError::KeyRoleUnresolved {
            role: key_role.into(),
            side: side_name.into(),
            path: path.to_string_lossy().into(),
        })
    }

    let rows = table.rows()
        .iter()
        .map(|raw| {
            let mut row = Row::new();
            for (idx, cell) in raw.iter().enumerate() {
                match &column_roles[idx] {
                    Some(role) => {
                        row.insert(role.clone(), Value::Text(cell.clone()));
                    },
                    None => {
                        // Unclaimed columns keep their source header. Headerless
                        // trailing columns have nowhere to live and are dropped.
                        if let Some(header) = headers.get(idx) {
                            if !header.is_empty() {
                                row.insert(header.clone(), Value::Text(cell.clone()));
                            }
                        }
                    },
                }
            }
            row
        })
        .collect();

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use core_lib::schema::Schema;

    fn side() -> Schema {
        Schema::from_value(json!({
            "version": "1",
            "sides": {
                "business": {
                    "file_pattern": "*.csv",
                    "field_roles": {
                        "order_id": ["单号", "订单号"],
                        "amount": "金额"
                    }
                },
                "finance": { "file_pattern": "*.csv", "field_roles": { "order_id": "id" } }
            },
            "key_role": "order_id"
        })).unwrap()
    }

    fn table(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter().map(|row| row.iter().map(|c| c.to_string()).collect()).collect(),
        )
    }

    #[test]
    fn first_matching_alias_claims_the_column() {
        let schema = side();
        let business = &schema.sides()["business"];
        let table = table(&["订单号", "金额", "备注"], &[&["A001", "100.00", "ok"]]);

        let rows = resolve("business", business, "order_id", &table, Path::new("b.csv")).unwrap();

        assert_eq!(rows[0]["order_id"], Value::Text("A001".into()));
        assert_eq!(rows[0]["amount"], Value::Text("100.00".into()));

        // The unclaimed column survives under its original header.
        assert_eq!(rows[0]["备注"], Value::Text("ok".into()));
    }

    #[test]
    fn unresolved_key_role_fails() {
        let schema = side();
        let business = &schema.sides()["business"];
        let table = table(&["something", "金额"], &[&["x", "1"]]);

        let err = resolve("business", business, "order_id", &table, Path::new("b.csv")).unwrap_err();
        assert!(matches!(err, SiftError::KeyRoleUnresolved { .. }));
    }

    #[test]
    fn alias_matching_is_case_sensitive() {
        let schema = Schema::from_value(json!({
            "version": "1",
            "sides": {
                "business": { "file_pattern": "*.csv", "field_roles": { "order_id": "ID" } },
                "finance": { "file_pattern": "*.csv", "field_roles": { "order_id": "id" } }
            },
            "key_role": "order_id"
        })).unwrap();

        let business = &schema.sides()["business"];
        let lower = table(&["id"], &[&["A001"]]);

        assert!(resolve("business", business, "order_id", &lower, Path::new("b.csv")).is_err());
    }
}
