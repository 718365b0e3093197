//! Field descriptors.
//!
//! A [`Field`] maps one scalar entity attribute to one table column. Its
//! [`SqlKind`] comes from the column's declared type as reported by the
//! backend, and its [`Permission`] from the attribute tag narrowed by what
//! the table actually carries.

use relorm_core::{OrmError, OrmResult};

use crate::validators::Rule;
use crate::value::ValueType;

/// Read/write permission of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permission {
    /// The attribute is selected on reads.
    pub read: bool,
    /// The attribute is written on inserts and updates.
    pub write: bool,
}

impl Permission {
    /// Read and write.
    pub const ALL: Self = Self {
        read: true,
        write: true,
    };

    /// Neither read nor write.
    pub const NONE: Self = Self {
        read: false,
        write: false,
    };

    /// Parses a `[r][w]` permission string.
    ///
    /// # Examples
    ///
    /// ```
    /// use relorm_db::fields::Permission;
    ///
    /// let p = Permission::parse("Brand", "r").unwrap();
    /// assert!(p.read && !p.write);
    /// assert!(Permission::parse("Brand", "x").is_err());
    /// ```
    pub fn parse(attribute: &str, raw: &str) -> OrmResult<Self> {
        let mut out = Self::NONE;
        for ch in raw.trim().chars() {
            match ch {
                'r' => out.read = true,
                'w' => out.write = true,
                other => {
                    return Err(OrmError::InvalidTag {
                        attribute: attribute.to_string(),
                        reason: format!("unknown permission '{other}'"),
                    })
                }
            }
        }
        Ok(out)
    }

    /// Intersects two permissions.
    #[must_use]
    pub const fn and(self, other: Self) -> Self {
        Self {
            read: self.read && other.read,
            write: self.write && other.write,
        }
    }
}

impl Default for Permission {
    fn default() -> Self {
        Self::ALL
    }
}

/// The SQL type family of a column, with the metadata the validator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlKind {
    /// Any integer column, with its representable range.
    Integer {
        /// Smallest storable value.
        min: i128,
        /// Largest storable value.
        max: i128,
    },
    /// Floating point and fixed precision numbers.
    Float,
    /// Sized character columns (`VARCHAR(n)`, `CHAR(n)`).
    Text {
        /// Declared length, when the type carries one.
        size: Option<u64>,
    },
    /// Large text columns (`TEXT`, `MEDIUMTEXT`, ...).
    TextArea {
        /// Maximum length for the bounded MySQL variants.
        size: Option<u64>,
    },
    /// `TIME`
    Time,
    /// `DATE`
    Date,
    /// `DATETIME` / `TIMESTAMP`
    DateTime,
    /// `BOOLEAN` / `TINYINT(1)`
    Bool,
    /// Anything else; carries the declared type.
    Custom(String),
}

impl SqlKind {
    /// Classifies a declared column type.
    ///
    /// `INTEGER` gets the 64-bit range since SQLite stores integer primary
    /// keys as 64-bit row ids; `INT` is the 32-bit type.
    ///
    /// # Examples
    ///
    /// ```
    /// use relorm_db::fields::SqlKind;
    ///
    /// assert_eq!(SqlKind::parse("varchar(20)"), SqlKind::Text { size: Some(20) });
    /// assert_eq!(SqlKind::parse("TINYINT UNSIGNED"), SqlKind::Integer { min: 0, max: 255 });
    /// assert_eq!(SqlKind::parse("tinyint(1)"), SqlKind::Bool);
    /// ```
    pub fn parse(data_type: &str) -> Self {
        let upper = data_type.trim().to_ascii_uppercase();
        let unsigned = upper.contains("UNSIGNED");
        let (base, arg) = match upper.find('(') {
            Some(open) => {
                let base = upper[..open].trim().to_string();
                let arg = upper[open + 1..]
                    .split(|c| c == ')' || c == ',')
                    .next()
                    .and_then(|s| s.trim().parse::<u64>().ok());
                (base, arg)
            }
            None => (
                upper
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_string(),
                None,
            ),
        };

        let int = |bits: u32| {
            if unsigned {
                Self::Integer {
                    min: 0,
                    max: (1_i128 << bits) - 1,
                }
            } else {
                Self::Integer {
                    min: -(1_i128 << (bits - 1)),
                    max: (1_i128 << (bits - 1)) - 1,
                }
            }
        };

        match base.as_str() {
            "TINYINT" if arg == Some(1) => Self::Bool,
            "BOOL" | "BOOLEAN" | "BIT" => Self::Bool,
            "TINYINT" => int(8),
            "SMALLINT" | "INT2" => int(16),
            "MEDIUMINT" => int(24),
            "INT" | "INT4" | "SERIAL" => int(32),
            "INTEGER" | "BIGINT" | "INT8" | "BIGSERIAL" => int(64),
            "FLOAT" | "DOUBLE" | "REAL" | "DECIMAL" | "NUMERIC" | "FLOAT4" | "FLOAT8" => {
                Self::Float
            }
            "DOUBLE PRECISION" => Self::Float,
            "VARCHAR" | "CHAR" | "CHARACTER" | "NVARCHAR" | "NCHAR" | "CHARACTER VARYING" => {
                Self::Text { size: arg }
            }
            "TINYTEXT" => Self::TextArea { size: Some(255) },
            "MEDIUMTEXT" => Self::TextArea {
                size: Some(16_777_215),
            },
            "LONGTEXT" => Self::TextArea {
                size: Some(4_294_967_295),
            },
            "TEXT" | "CLOB" => Self::TextArea { size: None },
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "DATETIME" | "TIMESTAMP" | "TIMESTAMPTZ" => Self::DateTime,
            _ => Self::Custom(data_type.trim().to_string()),
        }
    }

    /// Returns `true` for the numeric kinds.
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer { .. } | Self::Float)
    }
}

/// One scalar attribute mapped to one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// The entity attribute name.
    pub name: String,
    /// The column name.
    pub column: String,
    /// The declared attribute type.
    pub value_type: ValueType,
    /// The column's SQL type family.
    pub kind: SqlKind,
    /// The attribute is declared optional.
    pub nullable: bool,
    /// The column rejects NULL.
    pub not_null: bool,
    /// The column is part of the primary key.
    pub primary_key: bool,
    /// The database generates the value on insert.
    pub autoincrement: bool,
    /// The column has a DEFAULT clause.
    pub has_default: bool,
    /// The column exists in the table.
    pub in_db: bool,
    /// Declared permission, already narrowed to what the table supports.
    pub permission: Permission,
    /// Custom SELECT expression producing the value.
    pub select: Option<String>,
    /// The attribute is not backed by a column.
    pub custom: bool,
    /// The `validate` tag as written.
    pub user_validate: Option<String>,
    /// Composite rules evaluated before writes.
    pub rules: Vec<Rule>,
}

impl Field {
    /// Creates a field for an attribute; the column defaults to the
    /// snake-cased attribute name.
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            column: relorm_core::utils::text::snake_case(&name),
            name,
            value_type,
            kind: SqlKind::Custom(String::new()),
            nullable: false,
            not_null: false,
            primary_key: false,
            autoincrement: false,
            has_default: false,
            in_db: false,
            permission: Permission::ALL,
            select: None,
            custom: false,
            user_validate: None,
            rules: Vec::new(),
        }
    }

    /// The field is selected on reads: either a real column or a custom
    /// SELECT expression.
    pub const fn is_readable(&self) -> bool {
        self.permission.read && (self.in_db || self.select.is_some())
    }

    /// The field is written on inserts and updates.
    pub const fn is_writable(&self) -> bool {
        self.permission.write && self.in_db && self.select.is_none() && !self.custom
    }
}
