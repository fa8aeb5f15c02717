pub mod registry;

pub use registry::Registry;

use super::engine::format_ident;
use super::types::{ColumnRef, DataType, Expression, Value};
use super::validator;
use crate::errschema;
use crate::error::Result;

use itertools::Itertools as _;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A per-row CHECK constraint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Check {
    /// A typed predicate, evaluated by the validator and rendered into DDL.
    Expression(Expression),
    /// Raw SQL text mirrored from existing DDL. Only the store enforces it.
    Raw(String),
}

impl Check {
    /// Renders the check body as it appears in DDL, and thus in the store's
    /// "CHECK constraint failed" message.
    pub fn as_sql(&self) -> String {
        match self {
            Self::Expression(expr) => expr.to_string(),
            Self::Raw(sql) => sql.clone(),
        }
    }

    /// Returns true for checks on text values, which the validator runs after
    /// numeric checks.
    pub fn is_textual(&self) -> bool {
        match self {
            Self::Expression(expr) => expr.is_textual(),
            Self::Raw(_) => false,
        }
    }
}

impl From<Expression> for Check {
    fn from(expr: Expression) -> Self {
        Self::Expression(expr)
    }
}

/// A table column definition, built fluently:
/// `Column::new("rating", DataType::Real).not_null().check(...)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub unique: bool,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub checks: Vec<Check>,
}

impl Column {
    /// Creates a nullable column without constraints.
    pub fn new(name: &str, datatype: DataType) -> Self {
        Self {
            name: name.to_string(),
            datatype,
            nullable: true,
            default: None,
            unique: false,
            primary_key: false,
            autoincrement: false,
            checks: Vec::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Makes the column the primary key, which is implicitly non-null.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Assigns increasing row ids that are never reused. Requires an integer
    /// primary key.
    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn check(mut self, check: impl Into<Check>) -> Self {
        self.checks.push(check.into());
        self
    }

    /// Returns true if an insert may omit the column.
    pub fn is_optional(&self) -> bool {
        self.nullable || self.default.is_some() || self.is_rowid()
    }

    /// Returns true if the column aliases the rowid, which the store assigns
    /// when omitted.
    pub fn is_rowid(&self) -> bool {
        self.primary_key && self.datatype == DataType::Integer
    }

    /// The implicit check restricting booleans to 0 and 1.
    pub fn boolean_check(&self) -> Option<Expression> {
        (self.datatype == DataType::Boolean).then(|| {
            Expression::InSet(
                Box::new(Expression::Column(ColumnRef::new(None, &self.name, None))),
                vec![Value::Integer(0), Value::Integer(1)],
            )
        })
    }

    /// Generates the column's DDL definition.
    pub fn as_sql(&self) -> String {
        let mut sql = format!("{} {}", format_ident(&self.name), self.datatype.storage());
        if self.primary_key {
            sql += " PRIMARY KEY";
            if self.autoincrement {
                sql += " AUTOINCREMENT";
            }
        }
        if !self.nullable && !self.is_rowid() {
            sql += " NOT NULL";
        }
        if let Some(default) = &self.default {
            sql += &format!(" DEFAULT {}", default.as_sql());
        }
        if self.unique && !self.primary_key {
            sql += " UNIQUE";
        }
        for check in self.boolean_check().map(Check::Expression).iter().chain(&self.checks) {
            sql += &format!(" CHECK({})", check.as_sql());
        }
        sql
    }

    fn validate(&self, table: &str) -> Result<()> {
        if self.name.is_empty() {
            return errschema!("column name can't be empty in table {table}");
        }
        if self.autoincrement && !self.is_rowid() {
            return errschema!(
                "autoincrement column {table}.{} must be an integer primary key",
                self.name
            );
        }
        match &self.default {
            Some(Value::Null) if !self.nullable => {
                return errschema!("non-nullable column {table}.{} can't default to NULL", self.name)
            }
            Some(default) if !validator::accepts(self.datatype, default) => {
                return errschema!(
                    "invalid default {} for {} column {table}.{}",
                    default.as_sql(),
                    self.datatype,
                    self.name
                )
            }
            _ => {}
        }
        Ok(())
    }
}

/// A table schema. Immutable once registered; altering a table means
/// registering a new schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    /// A composite primary key, declared at table level. Empty when the key
    /// is a single column, or there is none.
    #[serde(default)]
    pub key: Vec<String>,
    /// Table-level checks, spanning several columns.
    pub checks: Vec<Check>,
    /// STRICT tables reject values that don't match the declared type.
    pub strict: bool,
}

impl Table {
    /// Creates a new STRICT table schema, validating it.
    pub fn new(name: &str, columns: Vec<Column>) -> Result<Self> {
        Self::with_checks(name, columns, Vec::new(), true)
    }

    /// Creates a table schema with table-level checks and strictness.
    pub fn with_checks(
        name: &str,
        columns: Vec<Column>,
        checks: Vec<Check>,
        strict: bool,
    ) -> Result<Self> {
        let table = Self { name: name.to_string(), columns, key: Vec::new(), checks, strict };
        table.validate()?;
        Ok(table)
    }

    /// Sets a composite primary key over the given columns.
    pub fn with_key(mut self, key: Vec<String>) -> Result<Self> {
        self.key = key;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return errschema!("table name can't be empty");
        }
        if self.columns.is_empty() {
            return errschema!("table {} has no columns", self.name);
        }
        let mut names = HashSet::new();
        for column in &self.columns {
            if !names.insert(column.name.as_str()) {
                return errschema!("duplicate column {} in table {}", column.name, self.name);
            }
            column.validate(&self.name)?;
        }
        let column_keys = self.columns.iter().filter(|c| c.primary_key).count();
        if column_keys > 1 || column_keys == 1 && !self.key.is_empty() {
            return errschema!("multiple primary keys in table {}", self.name);
        }
        let mut keys = HashSet::new();
        for name in &self.key {
            if self.column(name).is_none() {
                return errschema!("unknown key column {name} in table {}", self.name);
            }
            if !keys.insert(name.as_str()) {
                return errschema!("duplicate key column {name} in table {}", self.name);
            }
        }
        Ok(())
    }

    /// Fetches a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns the single-column primary key, if any. Composite keys are in
    /// `key`.
    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// References a column of this table, typed by its declaration.
    pub fn col(&self, name: &str) -> Result<Expression> {
        match self.column(name) {
            Some(column) => Ok(Expression::Column(ColumnRef::new(
                Some(&self.name),
                &column.name,
                Some(column.datatype),
            ))),
            None => errschema!("unknown column {}.{name}", self.name),
        }
    }

    /// Generates the CREATE TABLE statement for the schema.
    pub fn as_sql(&self) -> String {
        let definitions = self
            .columns
            .iter()
            .map(|c| c.as_sql())
            .chain((!self.key.is_empty()).then(|| {
                format!("PRIMARY KEY({})", self.key.iter().map(|k| format_ident(k)).join(", "))
            }))
            .chain(self.checks.iter().map(|c| format!("CHECK({})", c.as_sql())))
            .map(|d| format!("  {d}"))
            .join(",\n");
        let strict = if self.strict { " STRICT" } else { "" };
        format!("CREATE TABLE {} (\n{definitions}\n){strict}", format_ident(&self.name))
    }
}
