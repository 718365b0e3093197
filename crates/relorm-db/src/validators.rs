//! Validation rules.
//!
//! Every field carries a composite rule list built when its descriptor is
//! created: rules derived from the column metadata (nullability, integer
//! range, text size) followed by the attribute's own `validate` tag. The
//! list is evaluated against the attribute's value before every write.
//!
//! Relations carry their own, smaller rule set ([`RelationRule`]): presence,
//! element counts, and `dive` to validate the related entities.

use once_cell::sync::Lazy;
use regex::Regex;

use relorm_core::{OrmError, OrmResult};

use crate::fields::{Field, SqlKind};
use crate::model::CREATED_AT;
use crate::value::Value;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$").expect("valid regex")
});

/// One field-level validation rule.
///
/// # Examples
///
/// ```
/// use relorm_db::validators::Rule;
/// use relorm_db::value::Value;
///
/// let rule = Rule::parse("Brand", "max=5").unwrap();
/// assert!(rule.check(&Value::from("BMW")));
/// assert!(!rule.check(&Value::from("Mercedes")));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Skip the remaining rules when the value is zero.
    OmitEmpty,
    /// The value is set: not null, and not an empty string, blob, or list.
    Required,
    /// The value is a number or a numeric string.
    Numeric,
    /// The value is an e-mail address.
    Email,
    /// Numbers: value >= n. Strings and lists: length >= n.
    Min(f64),
    /// Numbers: value <= n. Strings and lists: length <= n.
    Max(f64),
    /// Strings and lists: length == n. Numbers: value == n.
    Len(f64),
    /// Value > n (length for strings).
    Gt(f64),
    /// Value >= n (length for strings).
    Gte(f64),
    /// Value < n (length for strings).
    Lt(f64),
    /// Value <= n (length for strings).
    Lte(f64),
    /// The rendered value is one of the listed words.
    OneOf(Vec<String>),
}

impl Rule {
    /// Parses one `tag[=param]` entry.
    pub fn parse(attribute: &str, entry: &str) -> OrmResult<Self> {
        let invalid = |reason: String| OrmError::InvalidTag {
            attribute: attribute.to_string(),
            reason,
        };
        let (tag, param) = match entry.split_once('=') {
            Some((t, p)) => (t.trim(), Some(p.trim())),
            None => (entry.trim(), None),
        };
        let number = || {
            param
                .and_then(|p| p.parse::<f64>().ok())
                .ok_or_else(|| invalid(format!("rule '{tag}' needs a numeric parameter")))
        };
        Ok(match tag {
            "omitempty" => Self::OmitEmpty,
            "required" => Self::Required,
            "numeric" => Self::Numeric,
            "email" => Self::Email,
            "min" => Self::Min(number()?),
            "max" => Self::Max(number()?),
            "len" => Self::Len(number()?),
            "gt" => Self::Gt(number()?),
            "gte" => Self::Gte(number()?),
            "lt" => Self::Lt(number()?),
            "lte" => Self::Lte(number()?),
            "oneof" => Self::OneOf(
                param
                    .ok_or_else(|| invalid("rule 'oneof' needs values".to_string()))?
                    .split_whitespace()
                    .map(ToString::to_string)
                    .collect(),
            ),
            other => return Err(invalid(format!("unknown validation rule '{other}'"))),
        })
    }

    /// The rule name as written in a tag.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::OmitEmpty => "omitempty",
            Self::Required => "required",
            Self::Numeric => "numeric",
            Self::Email => "email",
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::Len(_) => "len",
            Self::Gt(_) => "gt",
            Self::Gte(_) => "gte",
            Self::Lt(_) => "lt",
            Self::Lte(_) => "lte",
            Self::OneOf(_) => "oneof",
        }
    }

    /// The rule parameter, empty when the rule has none.
    pub fn param(&self) -> String {
        match self {
            Self::Min(n)
            | Self::Max(n)
            | Self::Len(n)
            | Self::Gt(n)
            | Self::Gte(n)
            | Self::Lt(n)
            | Self::Lte(n) => n.to_string(),
            Self::OneOf(words) => words.join(" "),
            _ => String::new(),
        }
    }

    /// Returns `true` if the value satisfies the rule.
    ///
    /// Null passes every rule except `required`; `required` lets `false`
    /// and `0` through since they are legitimate values for non-null
    /// columns.
    pub fn check(&self, value: &Value) -> bool {
        if value.is_null() {
            return !matches!(self, Self::Required);
        }
        match self {
            Self::OmitEmpty => true,
            Self::Required => !matches!(value, Value::String(s) if s.is_empty())
                && !matches!(value, Value::Bytes(b) if b.is_empty())
                && !matches!(value, Value::List(l) if l.is_empty()),
            Self::Numeric => match value {
                Value::Int(_) | Value::Float(_) => true,
                Value::String(s) => s.trim().parse::<f64>().is_ok(),
                _ => false,
            },
            Self::Email => value.as_str().is_some_and(|s| EMAIL_RE.is_match(s)),
            Self::Min(n) | Self::Gte(n) => measure(value).is_some_and(|m| m >= *n),
            Self::Max(n) | Self::Lte(n) => measure(value).is_some_and(|m| m <= *n),
            Self::Gt(n) => measure(value).is_some_and(|m| m > *n),
            Self::Lt(n) => measure(value).is_some_and(|m| m < *n),
            Self::Len(n) => measure(value).is_some_and(|m| (m - *n).abs() < f64::EPSILON),
            Self::OneOf(words) => {
                let rendered = value.to_string();
                words.iter().any(|w| *w == rendered)
            }
        }
    }
}

/// The magnitude a size rule compares: the number itself, or a length.
#[allow(clippy::cast_precision_loss)]
fn measure(value: &Value) -> Option<f64> {
    match value {
        Value::Int(_) | Value::Float(_) => value.as_float(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Bytes(b) => Some(b.len() as f64),
        Value::List(l) => Some(l.len() as f64),
        _ => None,
    }
}

/// Parses a comma-separated rule list.
///
/// # Examples
///
/// ```
/// use relorm_db::validators::{parse_rules, Rule};
///
/// let rules = parse_rules("Brand", "required, max=20").unwrap();
/// assert_eq!(rules, vec![Rule::Required, Rule::Max(20.0)]);
/// ```
pub fn parse_rules(attribute: &str, config: &str) -> OrmResult<Vec<Rule>> {
    config
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|e| Rule::parse(attribute, e))
        .collect()
}

/// Builds the composite rule list of a field.
///
/// `belongs_to_fk` marks a field that holds a belongs-to foreign key; its
/// value is only known after the related row is written, so it is exempt
/// when zero. `CreatedAt` is stamped on insert and never required. A
/// `validate:"-"` tag disables validation of the field.
pub fn compose(field: &Field, belongs_to_fk: bool) -> OrmResult<Vec<Rule>> {
    let user = field.user_validate.as_deref().unwrap_or_default().trim();
    if user == "-" || !field.in_db {
        return Ok(Vec::new());
    }

    let mut entries: Vec<String> = Vec::new();
    if belongs_to_fk {
        entries.push("omitempty".into());
    }
    if field.not_null && !field.autoincrement && field.name != CREATED_AT {
        if field.kind.is_numeric() {
            entries.push("numeric".into());
        } else {
            entries.push("required".into());
        }
    }
    match &field.kind {
        SqlKind::Integer { min, max } => {
            entries.push("numeric".into());
            entries.push(format!("min={min}"));
            entries.push(format!("max={max}"));
        }
        SqlKind::Float => entries.push("numeric".into()),
        SqlKind::Text { size: Some(size) } | SqlKind::TextArea { size: Some(size) } => {
            entries.push(format!("max={size}"));
        }
        _ => {}
    }

    let user_entries: Vec<String> = user
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(ToString::to_string)
        .collect();
    if user_entries.iter().any(|e| e == "omitempty") && !entries.contains(&"omitempty".into()) {
        entries.insert(0, "omitempty".into());
    }
    entries.extend(user_entries);

    let mut seen: Vec<String> = Vec::new();
    for entry in entries {
        if !seen.contains(&entry) {
            seen.push(entry);
        }
    }
    parse_rules(&field.name, &seen.join(","))
}

/// Evaluates a field's rules against a value.
///
/// The first violated rule surfaces as [`OrmError::ValidationFailed`].
pub fn validate_value(entity: &str, field: &Field, value: &Value) -> OrmResult<()> {
    for rule in &field.rules {
        if matches!(rule, Rule::OmitEmpty) {
            if value.is_zero() {
                return Ok(());
            }
            continue;
        }
        if !rule.check(value) {
            return Err(OrmError::ValidationFailed {
                entity: entity.to_string(),
                field: field.name.clone(),
                tag: rule.tag().to_string(),
                param: rule.param(),
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

/// One relation-level validation rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RelationRule {
    /// Skip the remaining rules when the relation is empty.
    OmitEmpty,
    /// At least one related entity is present.
    Required,
    /// At least n related entities.
    Min(usize),
    /// At most n related entities.
    Max(usize),
    /// Validate each related entity's own fields.
    Dive,
}

impl RelationRule {
    /// The rule name as written in a tag.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::OmitEmpty => "omitempty",
            Self::Required => "required",
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::Dive => "dive",
        }
    }

    /// The rule parameter, empty when the rule has none.
    pub fn param(self) -> String {
        match self {
            Self::Min(n) | Self::Max(n) => n.to_string(),
            _ => String::new(),
        }
    }
}

/// Parses a relation's `validate` tag.
pub fn parse_relation_rules(attribute: &str, config: &str) -> OrmResult<Vec<RelationRule>> {
    let mut out = Vec::new();
    for entry in config.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (tag, param) = match entry.split_once('=') {
            Some((t, p)) => (t.trim(), Some(p.trim())),
            None => (entry, None),
        };
        let count = || {
            param
                .and_then(|p| p.parse::<usize>().ok())
                .ok_or_else(|| OrmError::InvalidTag {
                    attribute: attribute.to_string(),
                    reason: format!("rule '{tag}' needs a count"),
                })
        };
        out.push(match tag {
            "-" => return Ok(Vec::new()),
            "omitempty" => RelationRule::OmitEmpty,
            "required" => RelationRule::Required,
            "min" => RelationRule::Min(count()?),
            "max" => RelationRule::Max(count()?),
            "dive" => RelationRule::Dive,
            other => {
                return Err(OrmError::InvalidTag {
                    attribute: attribute.to_string(),
                    reason: format!("unknown relation rule '{other}'"),
                })
            }
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;

    fn column(name: &str, data_type: &str, not_null: bool) -> Field {
        let mut f = Field::new(name, ValueType::Text);
        f.kind = SqlKind::parse(data_type);
        f.in_db = true;
        f.not_null = not_null;
        f
    }

    #[test]
    fn test_required() {
        assert!(!Rule::Required.check(&Value::Null));
        assert!(!Rule::Required.check(&Value::from("")));
        assert!(Rule::Required.check(&Value::from("x")));
        assert!(Rule::Required.check(&Value::Bool(false)));
        assert!(Rule::Required.check(&Value::Int(0)));
    }

    #[test]
    fn test_numeric() {
        assert!(Rule::Numeric.check(&Value::Int(3)));
        assert!(Rule::Numeric.check(&Value::from("3.5")));
        assert!(!Rule::Numeric.check(&Value::from("abc")));
        assert!(Rule::Numeric.check(&Value::Null));
    }

    #[test]
    fn test_size_rules() {
        assert!(Rule::Max(3.0).check(&Value::from("abc")));
        assert!(!Rule::Max(3.0).check(&Value::from("abcd")));
        assert!(Rule::Min(2.0).check(&Value::Int(2)));
        assert!(!Rule::Min(2.0).check(&Value::Int(1)));
        assert!(Rule::Len(2.0).check(&Value::from("ab")));
        assert!(Rule::Gt(0.0).check(&Value::Float(0.5)));
        assert!(!Rule::Lt(0.0).check(&Value::Float(0.5)));
        assert!(Rule::Max(2.0).check(&Value::from("éé")));
    }

    #[test]
    fn test_oneof_and_email() {
        let r = Rule::parse("Kind", "oneof=radio liquid").unwrap();
        assert!(r.check(&Value::from("radio")));
        assert!(!r.check(&Value::from("tv")));
        assert_eq!(r.param(), "radio liquid");
        assert!(Rule::Email.check(&Value::from("a@b.io")));
        assert!(!Rule::Email.check(&Value::from("nope")));
    }

    #[test]
    fn test_unknown_rule() {
        let err = parse_rules("Brand", "required,shiny").unwrap_err();
        assert!(matches!(err, OrmError::InvalidTag { .. }));
        assert!(parse_rules("Brand", "max=abc").is_err());
    }

    #[test]
    fn test_compose_not_null_text() {
        let f = column("Brand", "VARCHAR(20)", true);
        assert_eq!(compose(&f, false).unwrap(), vec![Rule::Required, Rule::Max(20.0)]);
    }

    #[test]
    fn test_compose_integer_range() {
        let f = column("Age", "TINYINT UNSIGNED", true);
        assert_eq!(
            compose(&f, false).unwrap(),
            vec![Rule::Numeric, Rule::Min(0.0), Rule::Max(255.0)]
        );
    }

    #[test]
    fn test_compose_belongs_to_and_user_rules() {
        let mut f = column("OwnerID", "INT", false);
        f.user_validate = Some("numeric,gt=0".into());
        let rules = compose(&f, true).unwrap();
        assert_eq!(rules[0], Rule::OmitEmpty);
        assert_eq!(rules.iter().filter(|r| **r == Rule::Numeric).count(), 1);
        assert_eq!(rules.last(), Some(&Rule::Gt(0.0)));
    }

    #[test]
    fn test_compose_skip() {
        let mut f = column("Brand", "VARCHAR(20)", true);
        f.user_validate = Some("-".into());
        assert!(compose(&f, false).unwrap().is_empty());
    }

    #[test]
    fn test_compose_autoincrement_not_required() {
        let mut f = column("ID", "INTEGER", true);
        f.autoincrement = true;
        let rules = compose(&f, false).unwrap();
        assert!(!rules.contains(&Rule::Required));
    }

    #[test]
    fn test_compose_created_at_not_required() {
        let f = column("CreatedAt", "DATETIME", true);
        assert!(!compose(&f, false).unwrap().contains(&Rule::Required));
    }

    #[test]
    fn test_validate_value_reports_rule() {
        let mut f = column("Brand", "VARCHAR(3)", true);
        f.rules = compose(&f, false).unwrap();
        let err = validate_value("Car", &f, &Value::from("Mercedes")).unwrap_err();
        match err {
            OrmError::ValidationFailed {
                entity,
                field,
                tag,
                param,
                value,
            } => {
                assert_eq!(entity, "Car");
                assert_eq!(field, "Brand");
                assert_eq!(tag, "max");
                assert_eq!(param, "3");
                assert_eq!(value, "Mercedes");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_omitempty_short_circuits() {
        let mut f = column("OwnerID", "INT", true);
        f.rules = vec![Rule::OmitEmpty, Rule::Gt(5.0)];
        assert!(validate_value("Car", &f, &Value::Int(0)).is_ok());
        assert!(validate_value("Car", &f, &Value::Int(3)).is_err());
    }

    #[test]
    fn test_relation_rules() {
        let rules = parse_relation_rules("Wheels", "required,min=1,max=4,dive").unwrap();
        assert_eq!(
            rules,
            vec![
                RelationRule::Required,
                RelationRule::Min(1),
                RelationRule::Max(4),
                RelationRule::Dive
            ]
        );
        assert!(parse_relation_rules("Wheels", "len=2").is_err());
        assert!(parse_relation_rules("Wheels", "-").unwrap().is_empty());
    }
}
