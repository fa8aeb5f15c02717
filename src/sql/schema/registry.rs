use super::{Check, Column, Table};
use crate::errschema;
use crate::error::Result;
use crate::sql::engine::Store;
use crate::sql::types::{DataType, Value};
use crate::sql::validator;

use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// A table schema registry. Tables are defined up front; the first lookup
/// by a query seals the registry, after which definitions are rejected.
#[derive(Debug, Default)]
pub struct Registry {
    tables: RwLock<BTreeMap<String, Arc<Table>>>,
    sealed: AtomicBool,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines and registers a table.
    pub fn define_table(&self, name: &str, columns: Vec<Column>) -> Result<Arc<Table>> {
        self.register(Table::new(name, columns)?)
    }

    /// Registers an already constructed table schema.
    pub fn register(&self, table: Table) -> Result<Arc<Table>> {
        if self.is_sealed() {
            return errschema!("registry is sealed, can't define table {}", table.name);
        }
        let mut tables = self.tables.write()?;
        if tables.contains_key(&table.name) {
            return errschema!("table {} already exists", table.name);
        }
        info!("Registered table {} with {} columns", table.name, table.columns.len());
        let table = Arc::new(table);
        tables.insert(table.name.clone(), table.clone());
        Ok(table)
    }

    /// Looks up a table for use in a query, sealing the registry.
    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        if !self.sealed.swap(true, Ordering::SeqCst) {
            debug!("Sealed schema registry");
        }
        match self.tables.read()?.get(name) {
            Some(table) => Ok(table.clone()),
            None => errschema!("table {name} does not exist"),
        }
    }

    /// Returns all registered tables, ordered by name.
    pub fn tables(&self) -> Result<Vec<Arc<Table>>> {
        Ok(self.tables.read()?.values().cloned().collect())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Registers a table that already exists in the store, reading its
    /// structure from the store's catalog without running any DDL.
    pub fn mirror(&self, store: &Store, name: &str) -> Result<Arc<Table>> {
        self.register(read_table(store, name)?)
    }

    /// Mirrors every user table in the store.
    pub fn mirror_all(&self, store: &Store) -> Result<Vec<Arc<Table>>> {
        store.table_names()?.iter().map(|name| self.mirror(store, name)).collect()
    }
}

/// The process-wide registry, if initialized.
static GLOBAL: RwLock<Option<Arc<Registry>>> = RwLock::new(None);

/// Installs a fresh process-wide registry. Errors if one is already installed.
pub fn init() -> Result<Arc<Registry>> {
    let mut global = GLOBAL.write()?;
    if global.is_some() {
        return errschema!("global registry already initialized");
    }
    let registry = Arc::new(Registry::new());
    *global = Some(registry.clone());
    Ok(registry)
}

/// Returns the process-wide registry. There is no implicit default: it must
/// be installed with init() first.
pub fn global() -> Result<Arc<Registry>> {
    match GLOBAL.read()?.as_ref() {
        Some(registry) => Ok(registry.clone()),
        None => errschema!("global registry not initialized"),
    }
}

/// Removes the process-wide registry, if any.
pub fn teardown() -> Result<()> {
    GLOBAL.write()?.take();
    Ok(())
}

/// Reads a table schema from the store catalog.
fn read_table(store: &Store, name: &str) -> Result<Table> {
    let ddl = store.query_rows(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
        &[Value::from(name)],
    )?;
    let ddl = match ddl.into_iter().next().and_then(|row| row.into_iter().next()) {
        Some(Value::Text(sql)) => sql,
        _ => return errschema!("table {name} does not exist"),
    };
    let upper = ddl.to_ascii_uppercase();
    let strict = upper.rsplit_once(')').is_some_and(|(_, tail)| tail.contains("STRICT"));

    // Raw CHECK clauses are kept at the table level, except for the boolean
    // 0/1 check, which marks the column as boolean.
    let mut checks = Vec::new();
    let mut booleans = Vec::new();
    for check in check_clauses(&ddl) {
        match boolean_column(&check) {
            Some(column) => booleans.push(column),
            None => checks.push(Check::Raw(check)),
        }
    }

    let quoted = quote(name);
    let mut columns = Vec::new();
    // Composite key columns, by position in the key.
    let mut key = Vec::new();
    let rows = store.query_rows(&format!("PRAGMA table_xinfo({quoted})"), &[])?;
    let composite =
        rows.iter().filter(|row| matches!(row.get(5), Some(Value::Integer(1..)))).count() > 1;
    // cid, name, type, notnull, dflt_value, pk, hidden
    for row in rows {
        let [
            _,
            Value::Text(column),
            Value::Text(declared),
            Value::Integer(notnull),
            default,
            Value::Integer(pk),
            Value::Integer(hidden),
        ] = row.as_slice()
        else {
            return errschema!("unexpected catalog row for table {name}");
        };
        if *hidden != 0 {
            continue;
        }
        let datatype = if booleans.contains(column) {
            DataType::Boolean
        } else {
            DataType::from_declared(declared)
        };
        let mut definition = Column::new(column, datatype);
        if *notnull != 0 {
            definition = definition.not_null();
        }
        if *pk > 0 && composite {
            key.push((*pk, column.clone()));
        } else if *pk > 0 {
            definition = definition.primary_key();
            if datatype == DataType::Integer && upper.contains("AUTOINCREMENT") {
                definition = definition.autoincrement();
            }
        }
        if let Value::Text(default) = default {
            // Defaults the column type can't hold are left to the store.
            match parse_literal(default, datatype) {
                Some(Value::Null) if *notnull != 0 => {}
                Some(value) if validator::accepts(datatype, &value) => {
                    definition = definition.default(value);
                }
                _ => {}
            }
        }
        columns.push(definition);
    }

    // Single-column unique constraints, from autoindexes.
    for entry in store.query_rows(&format!("PRAGMA index_list({quoted})"), &[])? {
        // seq, name, unique, origin, partial
        let [_, Value::Text(index), Value::Integer(1), Value::Text(origin), ..] = entry.as_slice()
        else {
            continue;
        };
        if origin != "u" {
            continue;
        }
        let info = store.query_rows(&format!("PRAGMA index_info({})", quote(index)), &[])?;
        if let [row] = info.as_slice() {
            if let Some(Value::Text(column)) = row.get(2) {
                if let Some(definition) = columns.iter_mut().find(|c| &c.name == column) {
                    definition.unique = true;
                }
            }
        }
    }

    key.sort();
    let key = key.into_iter().map(|(_, column)| column).collect();
    let table = Table::with_checks(name, columns, checks, strict)?.with_key(key)?;
    info!("Mirrored table {name} from store");
    Ok(table)
}

/// Quotes a name for use in a PRAGMA argument.
fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Extracts the bodies of CHECK(...) clauses from DDL text.
fn check_clauses(ddl: &str) -> Vec<String> {
    let mut checks = Vec::new();
    let upper = ddl.to_ascii_uppercase();
    let mut rest = 0;
    while let Some(start) = upper[rest..].find("CHECK") {
        let mut pos = rest + start + "CHECK".len();
        let bytes = ddl.as_bytes();
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if bytes.get(pos) != Some(&b'(') {
            rest = pos;
            continue;
        }
        let (mut depth, mut quoted) = (0, false);
        let body_start = pos + 1;
        let mut end = None;
        for (i, b) in bytes.iter().enumerate().skip(pos) {
            match b {
                b'\'' => quoted = !quoted,
                b'(' if !quoted => depth += 1,
                b')' if !quoted => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(end) = end else { break };
        checks.push(ddl[body_start..end].trim().to_string());
        rest = end + 1;
    }
    checks
}

/// Recognizes `col IN (0, 1)`, returning the column name.
fn boolean_column(check: &str) -> Option<String> {
    let (column, set) = check.split_once(" IN ")?;
    let set: String = set.chars().filter(|c| !c.is_whitespace()).collect();
    (set == "(0,1)").then(|| column.trim().trim_matches('"').to_string())
}

/// Parses a DEFAULT clause literal. Non-literal defaults such as
/// CURRENT_TIMESTAMP are left to the store.
fn parse_literal(sql: &str, datatype: DataType) -> Option<Value> {
    let sql = sql.trim();
    if sql.eq_ignore_ascii_case("NULL") {
        return Some(Value::Null);
    }
    if let Some(text) = sql.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Some(Value::Text(text.replace("''", "'")));
    }
    match datatype {
        DataType::Boolean => match sql {
            "0" => Some(Value::Boolean(false)),
            "1" => Some(Value::Boolean(true)),
            _ => None,
        },
        DataType::Integer => sql.parse().ok().map(Value::Integer),
        DataType::Real => sql.parse().ok().map(Value::Real),
        DataType::Any => sql
            .parse()
            .ok()
            .map(Value::Integer)
            .or_else(|| sql.parse().ok().map(Value::Real)),
        DataType::Text => None,
    }
}
