use indexmap::IndexMap;
use std::collections::HashSet;
use core_lib::value::Row;
use crate::Context;

///
/// One matched pair - indexes into the two sides' row vectors plus the raw key for
/// display purposes.
///
pub struct Pairing {
    pub business: usize,
    pub finance: usize,
    pub key: String,
}

pub struct MatchOutcome {
    pairs: Vec<Pairing>,
    business_only: Vec<usize>,
    finance_only: Vec<usize>,
    matched_keys: usize,
}

impl MatchOutcome {
    pub fn pairs(&self) -> &[Pairing] {
        &self.pairs
    }

    pub fn business_only(&self) -> &[usize] {
        &self.business_only
    }

    pub fn finance_only(&self) -> &[usize] {
        &self.finance_only
    }

    pub fn matched_keys(&self) -> usize {
        self.matched_keys
    }
}

///
/// Join the two cleaned sides on the key role.
///
/// Keys canonicalise through the schema's comparator before hashing, so "123" and
/// "000123" land in the same bucket under the numeric comparator. Duplicate keys
/// within a side survive as a Cartesian pairing with a DuplicateKey warning - they
/// normally indicate a missing aggregate_duplicates directive.
///
/// Output order is deterministic: pairs and business-only rows follow business row
/// order, finance-only rows follow finance row order.
///
pub fn match_sides(ctx: &Context, business: &[Row], finance: &[Row]) -> MatchOutcome {

    let key_role = ctx.schema().key_role();
    let comparator = ctx.schema().tolerance().key_comparator();

    let canonical = |row: &Row| -> String {
        comparator.canonical(&row.get(key_role).map(|value| value.display()).unwrap_or_default())
    };

    // Index the finance side by canonical key.
    let mut finance_index: IndexMap<String, Vec<usize>> = IndexMap::new();
    for (idx, row) in finance.iter().enumerate() {
        finance_index.entry(canonical(row)).or_default().push(idx);
    }

    let mut business_index: IndexMap<String, Vec<usize>> = IndexMap::new();
    for (idx, row) in business.iter().enumerate() {
        business_index.entry(canonical(row)).or_default().push(idx);
    }

    warn_duplicates(ctx, "business", &business_index);
    warn_duplicates(ctx, "finance", &finance_index);

    let mut pairs = vec!();
    let mut business_only = vec!();
    let mut matched: HashSet<String> = HashSet::new();

    for (idx, row) in business.iter().enumerate() {
        let key = canonical(row);
        match finance_index.get(&key) {
            Some(finance_rows) => {
                matched.insert(key);
                for finance_idx in finance_rows {
                    pairs.push(Pairing {
                        business: idx,
                        finance: *finance_idx,
                        key: row.get(key_role).map(|value| value.display()).unwrap_or_default(),
                    });
                }
            },
            None => business_only.push(idx),
        }
    }

    let finance_only = finance.iter()
        .enumerate()
        .filter(|&(_, row)| !business_index.contains_key(&canonical(row)))
        .map(|(idx, _)| idx)
        .collect::<Vec<usize>>();

    log::info!("Matched {} keys, {} business-only rows, {} finance-only rows",
        matched.len(), business_only.len(), finance_only.len());

    MatchOutcome {
        pairs,
        business_only,
        finance_only,
        matched_keys: matched.len(),
    }
}

fn warn_duplicates(ctx: &Context, side_name: &str, index: &IndexMap<String, Vec<usize>>) {
    for (key, rows) in index.iter().filter(|&(_, rows)| rows.len() > 1) {
        ctx.warn(format!("side '{}' has duplicate key '{}' ({} rows) after cleaning",
            side_name, key, rows.len()));
    }
}
