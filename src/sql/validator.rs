//! Pre-flight validation of candidate rows against a table's declared
//! constraints. Uniqueness and primary key collisions need the full table and
//! are left to the store. Violations use the store's own wording, so callers
//! see the same detail text whichever side caught the row.

use super::schema::{Check, Column, Table};
use super::types::{DataType, Expression, Row, Value};
use crate::error::{ConstraintKind, ConstraintViolation};

use std::result::Result;

/// Validates a candidate row for insertion. Rules run in order, and the first
/// violation is returned:
///
/// 1. Non-nullable columns without a default must be present.
/// 2. Values must match the column type. Unknown columns are rejected.
/// 3. Non-nullable columns must not be explicitly NULL.
/// 4. Numeric checks must pass.
/// 5. String checks must pass.
pub fn validate(table: &Table, row: &Row) -> Result<(), ConstraintViolation> {
    for column in &table.columns {
        if !column.is_optional() && !row.contains(&column.name) {
            return Err(not_null(table, column));
        }
    }
    check_assignments(table, row, true)
}

/// Validates the assigned columns of an UPDATE. Absent columns keep their
/// stored values, so only rules 2 to 5 apply, and only to assigned columns.
pub fn validate_update(table: &Table, assignments: &Row) -> Result<(), ConstraintViolation> {
    check_assignments(table, assignments, false)
}

fn check_assignments(table: &Table, row: &Row, full: bool) -> Result<(), ConstraintViolation> {
    for (name, value) in row.iter() {
        let Some(column) = table.column(name) else {
            return Err(violation(
                ConstraintKind::TypeMismatch,
                format!("{}.{name}", table.name),
                format!("table {} has no column named {name}", table.name),
            ));
        };
        check_type(table, column, value)?;
    }

    for (name, value) in row.iter() {
        if let Some(column) = table.column(name) {
            if value.is_null() && !column.nullable && !column.is_rowid() {
                return Err(not_null(table, column));
            }
        }
    }

    // Checks are evaluated on the row as the store would see it: defaults
    // filled in for an insert. Table checks spanning columns absent from an
    // update can't be evaluated here, and are left to the store.
    let mut full_row = row.clone();
    if full {
        for column in &table.columns {
            if let (false, Some(default)) = (row.contains(&column.name), &column.default) {
                full_row.set(&column.name, default.clone());
            }
        }
    }
    let column_checks = table
        .columns
        .iter()
        .filter(|c| full || row.contains(&c.name))
        .flat_map(|c| c.checks.iter().map(move |check| (Some(c), check)));
    let table_checks = table.checks.iter().map(|check| (None, check));
    let checks: Vec<(Option<&Column>, &Check)> = column_checks.chain(table_checks).collect();

    for textual in [false, true] {
        for (column, check) in checks.iter().filter(|(_, check)| check.is_textual() == textual) {
            let Check::Expression(expr) = check else { continue };
            if !full && !covers(expr, row) {
                continue;
            }
            if fails(expr, &full_row) {
                let column = match column {
                    Some(column) => format!("{}.{}", table.name, column.name),
                    None => table.name.clone(),
                };
                return Err(violation(
                    ConstraintKind::Check,
                    column,
                    format!("CHECK constraint failed: {}", check.as_sql()),
                ));
            }
        }
    }
    Ok(())
}

/// Returns true if the value is storable in a column of the given type,
/// following STRICT table rules. NULL is accepted by every type.
pub fn accepts(datatype: DataType, value: &Value) -> bool {
    match (datatype, value) {
        (_, Value::Null) => true,
        (DataType::Integer, Value::Integer(_) | Value::Boolean(_)) => true,
        // The store converts reals with no fractional part losslessly.
        (DataType::Integer, Value::Real(f)) => f.fract() == 0.0 && f.abs() < 9.2e18,
        (DataType::Real, Value::Real(_) | Value::Integer(_)) => true,
        (DataType::Text, Value::Text(_)) => true,
        (DataType::Any, _) => true,
        (DataType::Boolean, Value::Boolean(_) | Value::Integer(0 | 1)) => true,
        _ => false,
    }
}

fn check_type(table: &Table, column: &Column, value: &Value) -> Result<(), ConstraintViolation> {
    if accepts(column.datatype, value) {
        return Ok(());
    }
    let qualified = format!("{}.{}", table.name, column.name);
    // An out of range boolean integer passes the store's type check, but not
    // the implicit 0/1 check.
    let detail = match (column.boolean_check(), value) {
        (Some(check), Value::Integer(_)) => format!("CHECK constraint failed: {check}"),
        _ => format!(
            "cannot store {} value in {} column {qualified}",
            value.datatype().map_or("NULL", |t| t.storage()),
            column.datatype.storage()
        ),
    };
    Err(violation(ConstraintKind::TypeMismatch, qualified, detail))
}

/// A check fails only if it evaluates to false. NULL passes, as in SQL, and
/// so do checks that can't be evaluated row-locally.
fn fails(check: &Expression, row: &Row) -> bool {
    matches!(check.evaluate(row).map(|v| v.truthy()), Ok(Some(false)))
}

/// Returns true if every column the expression references is in the row.
fn covers(expr: &Expression, row: &Row) -> bool {
    expr.columns().iter().all(|c| row.contains(&c.name))
}

fn not_null(table: &Table, column: &Column) -> ConstraintViolation {
    let qualified = format!("{}.{}", table.name, column.name);
    let detail = format!("NOT NULL constraint failed: {qualified}");
    violation(ConstraintKind::NotNull, qualified, detail)
}

fn violation(kind: ConstraintKind, column: String, detail: String) -> ConstraintViolation {
    ConstraintViolation { kind, column, detail }
}
