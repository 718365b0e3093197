//! Struct tag parsing.
//!
//! Attributes carry a tag string in the conventional `key:"value"` form,
//! e.g. `orm:"column:brand_name;permission:r" validate:"max=20"`. The `orm`
//! value is itself a `;`-separated list of `key[:value]` entries.

use std::collections::HashMap;

use relorm_core::{OrmError, OrmResult};

use crate::fields::Permission;

/// A parsed `key:"value" key:"value"` tag string.
///
/// # Examples
///
/// ```
/// use relorm_db::tags::StructTag;
///
/// let tag = StructTag::parse("Brand", r#"orm:"column:brand" validate:"max=20""#).unwrap();
/// assert_eq!(tag.get("orm"), Some("column:brand"));
/// assert_eq!(tag.get("validate"), Some("max=20"));
/// assert_eq!(tag.get("fk"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructTag {
    entries: HashMap<String, String>,
}

impl StructTag {
    /// Parses a tag string; `attribute` is used for error messages.
    pub fn parse(attribute: &str, raw: &str) -> OrmResult<Self> {
        let invalid = |reason: &str| OrmError::InvalidTag {
            attribute: attribute.to_string(),
            reason: reason.to_string(),
        };

        let mut entries = HashMap::new();
        let mut rest = raw.trim_start();
        while !rest.is_empty() {
            let colon = rest.find(':').ok_or_else(|| invalid("missing ':' after key"))?;
            let key = rest[..colon].trim();
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(invalid("malformed key"));
            }
            let after = &rest[colon + 1..];
            let after = after
                .strip_prefix('"')
                .ok_or_else(|| invalid("value must be quoted"))?;
            let close = after.find('"').ok_or_else(|| invalid("unterminated value"))?;
            entries.insert(key.to_string(), after[..close].to_string());
            rest = after[close + 1..].trim_start();
        }
        Ok(Self { entries })
    }

    /// Returns the value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

/// The foreign-key override from an `fk` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FkTag {
    /// `fk:"X"`
    Short(String),
    /// `fk:"field:X;associationField:Y"`; either side may be omitted.
    Long {
        /// The owner-side attribute.
        field: Option<String>,
        /// The related-side attribute.
        association_field: Option<String>,
    },
}

impl FkTag {
    /// Parses the value of an `fk` tag.
    pub fn parse(attribute: &str, raw: &str) -> OrmResult<Self> {
        let raw = raw.trim();
        if !raw.contains(':') {
            return Ok(Self::Short(raw.to_string()));
        }
        let mut field = None;
        let mut association_field = None;
        for (key, value) in split_entries(raw) {
            match (key, value) {
                ("field", Some(v)) => field = Some(v.to_string()),
                ("associationField", Some(v)) => association_field = Some(v.to_string()),
                _ => {
                    return Err(OrmError::InvalidTag {
                        attribute: attribute.to_string(),
                        reason: format!("unknown fk entry '{key}'"),
                    })
                }
            }
        }
        Ok(Self::Long {
            field,
            association_field,
        })
    }
}

/// The parsed `orm` tag of one attribute, merged with the standalone
/// relation keys (`relation`, `fk`, `polymorphic`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrmTag {
    /// `-`: the attribute is skipped.
    pub skip: bool,
    /// `column:<n>`
    pub column: Option<String>,
    /// `permission:[r][w]`
    pub permission: Option<Permission>,
    /// `select:<sql>`
    pub select: Option<String>,
    /// `custom`
    pub custom: bool,
    /// `relation:<kind>`
    pub relation: Option<String>,
    /// `fk:<...>`
    pub fk: Option<FkTag>,
    /// `polymorphic:<prefix>`
    pub polymorphic: Option<String>,
    /// `polymorphic_value:<v>`
    pub polymorphic_value: Option<String>,
    /// `join_table:<t>`
    pub join_table: Option<String>,
    /// `join_fk:<c>`
    pub join_fk: Option<String>,
    /// `join_afk:<c>`
    pub join_afk: Option<String>,
    /// The `validate` tag, verbatim.
    pub validate: Option<String>,
}

impl OrmTag {
    /// Parses the full tag string of an attribute.
    ///
    /// # Examples
    ///
    /// ```
    /// use relorm_db::tags::{FkTag, OrmTag};
    ///
    /// let tag = OrmTag::parse(
    ///     "Radio",
    ///     r#"orm:"polymorphic:Car;polymorphic_value:radio" fk:"ID""#,
    /// )
    /// .unwrap();
    /// assert_eq!(tag.polymorphic.as_deref(), Some("Car"));
    /// assert_eq!(tag.polymorphic_value.as_deref(), Some("radio"));
    /// assert_eq!(tag.fk, Some(FkTag::Short("ID".into())));
    /// ```
    pub fn parse(attribute: &str, raw: &str) -> OrmResult<Self> {
        let tag = StructTag::parse(attribute, raw)?;
        let mut out = Self::default();

        if let Some(orm) = tag.get("orm") {
            for (key, value) in split_entries(orm) {
                out.apply(attribute, key, value)?;
            }
        }

        // Standalone relation keys override the orm-embedded ones.
        for key in [
            "relation",
            "polymorphic",
            "polymorphic_value",
            "join_table",
            "join_fk",
            "join_afk",
        ] {
            if let Some(v) = tag.get(key) {
                out.apply(attribute, key, Some(v.trim()))?;
            }
        }
        if let Some(fk) = tag.get("fk") {
            out.fk = Some(FkTag::parse(attribute, fk)?);
        }
        out.validate = tag.get("validate").map(|v| v.trim().to_string());
        Ok(out)
    }

    fn apply(&mut self, attribute: &str, key: &str, value: Option<&str>) -> OrmResult<()> {
        let need = |v: Option<&str>| {
            v.filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .ok_or_else(|| OrmError::InvalidTag {
                    attribute: attribute.to_string(),
                    reason: format!("'{key}' requires a value"),
                })
        };
        match key {
            "-" => self.skip = true,
            "custom" => self.custom = true,
            "column" => self.column = Some(need(value)?),
            "permission" => self.permission = Some(Permission::parse(attribute, &need(value)?)?),
            "select" => self.select = Some(need(value)?),
            "relation" => self.relation = Some(need(value)?),
            "fk" => self.fk = Some(FkTag::Short(need(value)?)),
            "polymorphic" => self.polymorphic = Some(need(value)?),
            "polymorphic_value" => self.polymorphic_value = Some(need(value)?),
            "join_table" => self.join_table = Some(need(value)?),
            "join_fk" => self.join_fk = Some(need(value)?),
            "join_afk" => self.join_afk = Some(need(value)?),
            other => {
                return Err(OrmError::InvalidTag {
                    attribute: attribute.to_string(),
                    reason: format!("unknown orm key '{other}'"),
                })
            }
        }
        Ok(())
    }
}

/// Splits `a:1;b;c:x:y` into `[("a", Some("1")), ("b", None), ("c", Some("x:y"))]`.
fn split_entries(raw: &str) -> impl Iterator<Item = (&str, Option<&str>)> {
    raw.split(';')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((k, v)) => (k.trim(), Some(v.trim())),
            None => (entry, None),
        })
}
