use regex::Regex;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use core_lib::schema::Schema;
use crate::error::SiftError;

///
/// Assign every input file to exactly one side.
///
/// Patterns are tested against the file's basename, sides in declaration order and
/// patterns in declaration order within a side - the first match claims the file.
/// A file no side claims fails the task. Each side's files are then sorted by
/// basename so the artifact does not depend on the order files were supplied in.
///
pub fn classify(schema: &Schema, files: &[PathBuf]) -> Result<IndexMap<String, Vec<PathBuf>>, SiftError> {

    let mut matchers = vec!();
    for (side_name, side) in schema.sides() {
        let compiled = side.file_pattern()
            .iter()
            .map(|pattern| Matcher::compile(side_name, pattern))
            .collect::<Result<Vec<Matcher>, SiftError>>()?;
        matchers.push((side_name.clone(), compiled));
    }

    // Seed with every declared side so empty sides are observable.
    let mut assignments: IndexMap<String, Vec<PathBuf>> = schema.sides()
        .keys()
        .map(|side_name| (side_name.clone(), vec!()))
        .collect();

    for file in files {
        let basename = basename(file);

        let claimed = matchers.iter()
            .find(|(_, compiled)| compiled.iter().any(|matcher| matcher.matches(&basename)));

        match claimed {
            Some((side_name, _)) => {
                assignments.get_mut(side_name).expect("side disappeared").push(file.clone());
                log::debug!("Classified {} as side {}", basename, side_name);
            },
            None => return Err(SiftError::FileUnclassified { filename: basename }),
        }
    }

    for (side_name, side_files) in &mut assignments {
        if side_files.is_empty() && !schema.allow_empty_side() {
            return Err(SiftError::SideEmpty { side: side_name.clone() })
        }

        side_files.sort_by_key(|file| basename(file));
    }

    Ok(assignments)
}

fn basename(file: &Path) -> String {
    file.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| file.to_string_lossy().to_string())
}

enum Matcher {
    Glob(glob::Pattern),
    Regex(Regex),
}

impl Matcher {
    ///
    /// A pattern is a glob unless prefixed with 're:'.
    ///
    fn compile(side: &str, pattern: &str) -> Result<Matcher, SiftError> {
        match pattern.strip_prefix("re:") {
            Some(expression) => {
                let regex = Regex::new(expression)
                    .map_err(|_| SiftError::BadPattern { side: side.into(), pattern: pattern.into() })?;
                Ok(Matcher::Regex(regex))
            },
            None => {
                let glob = glob::Pattern::new(pattern)
                    .map_err(|_| SiftError::BadPattern { side: side.into(), pattern: pattern.into() })?;
                Ok(Matcher::Glob(glob))
            },
        }
    }

    fn matches(&self, basename: &str) -> bool {
        match self {
            Matcher::Glob(pattern) => pattern.matches(basename),
            Matcher::Regex(regex) => regex.is_match(basename),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(business_patterns: serde_json::Value, finance_patterns: serde_json::Value) -> Schema {
        Schema::from_value(json!({
            "version": "1",
            "sides": {
                "business": { "file_pattern": business_patterns, "field_roles": { "order_id": "id" } },
                "finance": { "file_pattern": finance_patterns, "field_roles": { "order_id": "id" } }
            },
            "key_role": "order_id"
        })).unwrap()
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|name| PathBuf::from(format!("/data/{}", name))).collect()
    }

    #[test]
    fn globs_match_basenames() {
        let schema = schema(json!("biz_*.csv"), json!("fin_*.csv"));
        let assignments = classify(&schema, &paths(&["biz_jan.csv", "fin_jan.csv"])).unwrap();

        assert_eq!(assignments["business"], paths(&["biz_jan.csv"]));
        assert_eq!(assignments["finance"], paths(&["fin_jan.csv"]));
    }

    #[test]
    fn regex_patterns_use_the_re_prefix() {
        let schema = schema(json!("re:^biz-[0-9]+\\.csv$"), json!("*.xlsx"));
        let assignments = classify(&schema, &paths(&["biz-001.csv", "ledger.xlsx"])).unwrap();

        assert_eq!(assignments["business"], paths(&["biz-001.csv"]));
    }

    #[test]
    fn earlier_declared_side_wins_ties() {
        // Both sides match every file - business is declared first and claims them all.
        let schema = Schema::from_value(json!({
            "version": "1",
            "sides": {
                "business": { "file_pattern": "*.csv", "field_roles": { "order_id": "id" } },
                "finance": { "file_pattern": "*.csv", "field_roles": { "order_id": "id" } }
            },
            "key_role": "order_id",
            "allow_empty_side": true
        })).unwrap();

        let assignments = classify(&schema, &paths(&["everything.csv", "more.csv"])).unwrap();

        assert_eq!(assignments["business"].len(), 2);
        assert!(assignments["finance"].is_empty());
    }

    #[test]
    fn unmatched_file_fails() {
        let schema = schema(json!("biz_*.csv"), json!("fin_*.csv"));
        let err = classify(&schema, &paths(&["biz_jan.csv", "fin_jan.csv", "mystery.txt"])).unwrap_err();

        assert!(matches!(err, SiftError::FileUnclassified { filename } if filename == "mystery.txt"));
    }

    #[test]
    fn empty_side_fails_without_the_flag() {
        let schema = schema(json!("biz_*.csv"), json!("fin_*.csv"));
        let err = classify(&schema, &paths(&["biz_jan.csv"])).unwrap_err();

        assert!(matches!(err, SiftError::SideEmpty { side } if side == "finance"));
    }

    #[test]
    fn files_sort_by_basename_within_a_side() {
        let schema = schema(json!("biz_*.csv"), json!("fin_*.csv"));
        let assignments = classify(&schema, &paths(&["biz_b.csv", "fin_a.csv", "biz_a.csv"])).unwrap();

        assert_eq!(assignments["business"], paths(&["biz_a.csv", "biz_b.csv"]));
    }
}
