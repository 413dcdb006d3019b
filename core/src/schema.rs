use regex::Regex;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{io::BufReader, path::Path, str::FromStr};
use crate::{error::SchemaError, predicate, value::KeyComparator};

///
/// The reconciliation schema. Immutable per task, shared read-only once validated.
///
/// A schema declares the two sides being compared (each with file patterns and a
/// role-to-alias map), the key role the sides join on, tolerances, optional per-side
/// cleaning directives and an ordered list of validation rules.
///
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Schema {
    version: String,
    sides: IndexMap<String, Side>,
    key_role: String,

    #[serde(default)]
    tolerance: Tolerance,

    #[serde(default)]
    cleaning_rules: IndexMap<String, Vec<CleaningOp>>,

    #[serde(default)]
    validations: Vec<ValidationRule>,

    // A side with no classified files fails the task unless this is set.
    #[serde(default)]
    allow_empty_side: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Side {
    #[serde(deserialize_with = "one_or_many")]
    file_pattern: Vec<String>,
    field_roles: IndexMap<String, Aliases>,
    sheet: Option<String>,
}

///
/// Source headers that map to a role. A bare string in the schema is lifted to a
/// one-element list during deserialization.
///
#[derive(Clone, Debug, Serialize)]
#[serde(transparent)]
pub struct Aliases(Vec<String>);

impl Aliases {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Aliases {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Aliases(one_or_many(deserializer)?))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Tolerance {
    #[serde(default)]
    amount_diff_max: Decimal,

    #[serde(default = "default_date_format")]
    date_format: String,

    #[serde(default)]
    key_comparator: KeyComparator,

    // Schemas may carry extra tolerance knobs we don't interpret.
    #[serde(flatten)]
    extras: IndexMap<String, serde_json::Value>,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            amount_diff_max: Decimal::ZERO,
            date_format: default_date_format(),
            key_comparator: KeyComparator::default(),
            extras: IndexMap::new(),
        }
    }
}

///
/// Per-side cleaning directives. Declaration order matters, except that aggregation
/// is always applied last.
///
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "op")]
pub enum CleaningOp {
    #[serde(rename = "amount_conversion.divide_by_100")]
    DivideBy100 {
        #[serde(deserialize_with = "one_or_many")]
        fields: Vec<String>,
    },

    #[serde(rename = "amount_conversion.multiply_by")]
    MultiplyBy {
        #[serde(deserialize_with = "one_or_many")]
        fields: Vec<String>,
        factor: Decimal,
    },

    #[serde(rename = "trim_whitespace")]
    TrimWhitespace {
        #[serde(deserialize_with = "one_or_many")]
        fields: Vec<String>,
    },

    #[serde(rename = "date_parse")]
    DateParse {
        #[serde(deserialize_with = "one_or_many")]
        fields: Vec<String>,
    },

    #[serde(rename = "aggregate_duplicates")]
    AggregateDuplicates {
        group_by: String,
        #[serde(default)]
        aggregations: IndexMap<String, Aggregation>,
    },
}

///
/// How a role's values combine when duplicate keys are aggregated.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Mean,
    First,
    Last,
    Count,
    Max,
    Min,
    Join(String),
}

impl Aggregation {
    fn spelling(&self) -> String {
        match self {
            Aggregation::Sum => "sum".into(),
            Aggregation::Mean => "mean".into(),
            Aggregation::First => "first".into(),
            Aggregation::Last => "last".into(),
            Aggregation::Count => "count".into(),
            Aggregation::Max => "max".into(),
            Aggregation::Min => "min".into(),
            Aggregation::Join(sep) => format!("join:{}", sep),
        }
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(spelling: &str) -> Result<Self, Self::Err> {
        match spelling {
            "sum" => Ok(Aggregation::Sum),
            "mean" => Ok(Aggregation::Mean),
            "first" => Ok(Aggregation::First),
            "last" => Ok(Aggregation::Last),
            "count" => Ok(Aggregation::Count),
            "max" => Ok(Aggregation::Max),
            "min" => Ok(Aggregation::Min),
            other => match other.strip_prefix("join:") {
                Some(separator) => Ok(Aggregation::Join(separator.to_string())),
                None => Err(format!("unknown aggregation '{}'", other)),
            },
        }
    }
}

impl Serialize for Aggregation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.spelling())
    }
}

impl<'de> Deserialize<'de> for Aggregation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let spelling = String::deserialize(deserializer)?;
        spelling.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationRule {
    name: String,
    condition_expr: String,
    issue_type: String,
    detail_template: String,

    #[serde(default)]
    scope: RuleScope,
}

///
/// Which candidates a rule applies to. The `business`/`finance` spellings bind to the
/// first and second declared side respectively, whatever those sides are named.
///
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Pair,
    BusinessOnly,
    FinanceOnly,
}

impl Default for RuleScope {
    fn default() -> Self {
        RuleScope::Pair
    }
}

impl Side {
    pub fn file_pattern(&self) -> &[String] {
        &self.file_pattern
    }

    pub fn field_roles(&self) -> &IndexMap<String, Aliases> {
        &self.field_roles
    }

    pub fn sheet(&self) -> Option<&str> {
        self.sheet.as_deref()
    }
}

impl Tolerance {
    pub fn amount_diff_max(&self) -> Decimal {
        self.amount_diff_max
    }

    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    pub fn key_comparator(&self) -> KeyComparator {
        self.key_comparator
    }
}

impl ValidationRule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn condition_expr(&self) -> &str {
        &self.condition_expr
    }

    pub fn issue_type(&self) -> &str {
        &self.issue_type
    }

    pub fn detail_template(&self) -> &str {
        &self.detail_template
    }

    pub fn scope(&self) -> RuleScope {
        self.scope
    }
}

impl Schema {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn sides(&self) -> &IndexMap<String, Side> {
        &self.sides
    }

    pub fn key_role(&self) -> &str {
        &self.key_role
    }

    pub fn tolerance(&self) -> &Tolerance {
        &self.tolerance
    }

    pub fn cleaning_for(&self, side: &str) -> &[CleaningOp] {
        match self.cleaning_rules.get(side) {
            Some(ops) => ops,
            None => &[],
        }
    }

    pub fn validations(&self) -> &[ValidationRule] {
        &self.validations
    }

    pub fn allow_empty_side(&self) -> bool {
        self.allow_empty_side
    }

    ///
    /// Parse a schema from an in-flight JSON object (the RPC path) and validate it.
    ///
    pub fn from_value(value: serde_json::Value) -> Result<Self, SchemaError> {
        let schema: Self = serde_json::from_value(value)
            .map_err(|source| SchemaError::SchemaObjectInvalid { source })?;
        schema.validate()?;
        Ok(schema)
    }

    ///
    /// Load a schema from a YAML file and validate it.
    ///
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let rdr = BufReader::new(std::fs::File::open(path)
            .map_err(|source| SchemaError::SchemaFileNotFound { path: path.to_string_lossy().into(), source })?);

        let schema: Self = serde_yaml::from_reader(rdr)
            .map_err(|source| SchemaError::SchemaFileInvalid { path: path.to_string_lossy().into(), source })?;

        schema.validate()?;
        Ok(schema)
    }

    ///
    /// Cross-field validation. Deserialization already normalised aliases and filled
    /// defaults, so re-validating a rendered schema is idempotent.
    ///
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.version.trim().is_empty() {
            return Self::invalid("a version must be declared")
        }

        if self.sides.is_empty() {
            return Self::invalid("at least one side must be declared")
        }

        if self.sides.len() != 2 {
            return Self::invalid(&format!("exactly two sides must be declared, found {}", self.sides.len()))
        }

        for (name, side) in &self.sides {
            if side.file_pattern.is_empty() {
                return Self::invalid(&format!("side '{}' declares no file patterns", name))
            }

            for pattern in &side.file_pattern {
                if pattern.trim().is_empty() {
                    return Self::invalid(&format!("side '{}' declares an empty file pattern", name))
                }

                if let Some(expression) = pattern.strip_prefix("re:") {
                    if let Err(err) = Regex::new(expression) {
                        return Self::invalid(&format!("side '{}' pattern '{}' is not a valid regular expression: {}", name, pattern, err))
                    }
                }
            }

            match side.field_roles.get(&self.key_role) {
                None => return Self::invalid(&format!("key role '{}' is not declared in side '{}'", self.key_role, name)),
                Some(aliases) if aliases.as_slice().is_empty() => {
                    return Self::invalid(&format!("key role '{}' has no aliases in side '{}'", self.key_role, name))
                },
                Some(_) => {},
            }
        }

        if self.tolerance.amount_diff_max < Decimal::ZERO {
            return Self::invalid("tolerance.amount_diff_max cannot be negative")
        }

        for (side_name, ops) in &self.cleaning_rules {
            let side = match self.sides.get(side_name) {
                Some(side) => side,
                None => return Self::invalid(&format!("cleaning rules declared for unknown side '{}'", side_name)),
            };

            for op in ops {
                if let CleaningOp::AggregateDuplicates { group_by, aggregations } = op {
                    if !side.field_roles.contains_key(group_by) {
                        return Self::invalid(&format!("aggregate_duplicates group_by '{}' is not a declared role of side '{}'", group_by, side_name))
                    }

                    // Combining the key role itself with anything but 'first' would corrupt the join.
                    if let Some(aggregation) = aggregations.get(&self.key_role) {
                        if *aggregation != Aggregation::First {
                            return Self::invalid(&format!("the key role '{}' can only aggregate as 'first'", self.key_role))
                        }
                    }
                }
            }
        }

        for rule in &self.validations {
            if rule.name.trim().is_empty() {
                return Self::invalid("every validation needs a name")
            }

            if rule.issue_type.trim().is_empty() {
                return Self::invalid(&format!("validation '{}' has no issue_type", rule.name))
            }

            if let Err(err) = predicate::parse(&rule.condition_expr) {
                return Self::invalid(&format!("validation '{}' condition does not parse: {}", rule.name, err))
            }
        }

        Ok(())
    }

    fn invalid(reason: &str) -> Result<(), SchemaError> {
        Err(SchemaError::SchemaInvalid { reason: reason.into() })
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(single) => vec!(single),
        OneOrMany::Many(many) => many,
    })
}

fn default_date_format() -> String {
    "%Y-%m-%d".into()
}
