use super::{DataType, Row, Value};
use crate::error::Result;
use crate::sql::engine::Compiler;
use crate::sql::planner::{Direction, Projected, Query};
use crate::{errbuild, errexec};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A reference to a table or CTE column. The table is the source name (or
/// alias) the column is resolved against; None resolves against the
/// innermost source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
    /// The column's declared type, if known.
    pub datatype: Option<DataType>,
}

impl ColumnRef {
    pub fn new(table: Option<&str>, name: &str, datatype: Option<DataType>) -> Self {
        Self { table: table.map(str::to_string), name: name.to_string(), datatype }
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{table}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An aggregate function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Aggregate {
    Average(Box<Expression>),
    Count(Box<Expression>),
    /// COUNT(*), counting rows including NULLs.
    CountAll,
    Max(Box<Expression>),
    Min(Box<Expression>),
    Sum(Box<Expression>),
}

impl Aggregate {
    /// The SQL function name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Average(_) => "AVG",
            Self::Count(_) | Self::CountAll => "COUNT",
            Self::Max(_) => "MAX",
            Self::Min(_) => "MIN",
            Self::Sum(_) => "SUM",
        }
    }

    /// The aggregated expression, or None for COUNT(*).
    pub fn expr(&self) -> Option<&Expression> {
        match self {
            Self::Average(expr)
            | Self::Count(expr)
            | Self::Max(expr)
            | Self::Min(expr)
            | Self::Sum(expr) => Some(expr),
            Self::CountAll => None,
        }
    }
}

/// A scalar SQL function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Function {
    Abs,
    Coalesce,
    Floor,
    Length,
    Lower,
    Round,
    Upper,
}

impl Function {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Abs => "abs",
            Self::Coalesce => "coalesce",
            Self::Floor => "floor",
            Self::Length => "length",
            Self::Lower => "lower",
            Self::Round => "round",
            Self::Upper => "upper",
        }
    }
}

/// An expression. Column references, literals, aggregates and raw SQL
/// fragments are tagged variants, so the type of a computed projection is
/// known without parsing SQL text. Logical operators nest as a tree to keep
/// the caller's precedence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    // Values
    Column(ColumnRef),
    /// A column of the enclosing query's row, used in correlated sub-plans.
    Outer(ColumnRef),
    Literal(Value),
    /// A reference to a projection or CTE alias, e.g. ORDER BY total_revenue.
    Alias(String),
    Aggregate(Aggregate),
    /// Free-form SQL text with a declared result type.
    Raw { sql: String, datatype: Option<DataType> },
    Function(Function, Vec<Expression>),
    Case { branches: Vec<(Expression, Expression)>, otherwise: Option<Box<Expression>> },
    /// A scalar sub-plan, returning the first column of its first row.
    Subquery(Box<Query>),

    // Logical operations
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),

    // Comparison operations
    Between(Box<Expression>, Box<Expression>, Box<Expression>),
    Equal(Box<Expression>, Box<Expression>),
    GreaterThan(Box<Expression>, Box<Expression>),
    GreaterThanOrEqual(Box<Expression>, Box<Expression>),
    InSet(Box<Expression>, Vec<Value>),
    IsNotNull(Box<Expression>),
    IsNull(Box<Expression>),
    LessThan(Box<Expression>, Box<Expression>),
    LessThanOrEqual(Box<Expression>, Box<Expression>),
    Like(Box<Expression>, Box<Expression>),
    NotEqual(Box<Expression>, Box<Expression>),

    // Mathematical operations
    Add(Box<Expression>, Box<Expression>),
    /// Division in the floating point path, always yielding a real.
    Divide(Box<Expression>, Box<Expression>),
    /// Explicit integer division, truncating towards zero.
    IntegerDivide(Box<Expression>, Box<Expression>),
    Multiply(Box<Expression>, Box<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
}

impl Expression {
    /// Returns the expression's result type, if it can be determined.
    pub fn datatype(&self) -> Option<DataType> {
        self.datatype_with(&|_| None)
    }

    /// Returns the expression's result type, asking the closure first for
    /// every node. Used to type columns, aliases and sub-plans against the
    /// sources in scope.
    pub fn datatype_with(
        &self,
        resolve: &dyn Fn(&Expression) -> Option<DataType>,
    ) -> Option<DataType> {
        if let Some(datatype) = resolve(self) {
            return Some(datatype);
        }
        match self {
            Self::Column(column) | Self::Outer(column) => column.datatype,
            Self::Literal(value) => value.datatype(),
            Self::Alias(_) | Self::Subquery(_) => None,
            // Averages are always real; the store never truncates them.
            Self::Aggregate(Aggregate::Average(_)) => Some(DataType::Real),
            Self::Aggregate(Aggregate::Count(_) | Aggregate::CountAll) => Some(DataType::Integer),
            Self::Aggregate(Aggregate::Max(expr) | Aggregate::Min(expr) | Aggregate::Sum(expr)) => {
                expr.datatype_with(resolve)
            }
            Self::Raw { datatype, .. } => *datatype,
            Self::Function(Function::Length, _) => Some(DataType::Integer),
            Self::Function(Function::Lower | Function::Upper, _) => Some(DataType::Text),
            Self::Function(Function::Round | Function::Floor, _) => Some(DataType::Real),
            Self::Function(Function::Abs | Function::Coalesce, args) => {
                args.iter().find_map(|arg| arg.datatype_with(resolve))
            }
            Self::Case { branches, otherwise } => branches
                .iter()
                .map(|(_, then)| then)
                .chain(otherwise.as_deref())
                .find_map(|expr| expr.datatype_with(resolve)),

            Self::And(..)
            | Self::Or(..)
            | Self::Not(_)
            | Self::Between(..)
            | Self::Equal(..)
            | Self::GreaterThan(..)
            | Self::GreaterThanOrEqual(..)
            | Self::InSet(..)
            | Self::IsNotNull(_)
            | Self::IsNull(_)
            | Self::LessThan(..)
            | Self::LessThanOrEqual(..)
            | Self::Like(..)
            | Self::NotEqual(..) => Some(DataType::Boolean),

            Self::Divide(..) => Some(DataType::Real),
            Self::IntegerDivide(..) => Some(DataType::Integer),
            Self::Add(lhs, rhs) | Self::Multiply(lhs, rhs) | Self::Subtract(lhs, rhs) => {
                match (lhs.datatype_with(resolve), rhs.datatype_with(resolve)) {
                    (Some(DataType::Real), _) | (_, Some(DataType::Real)) => Some(DataType::Real),
                    (Some(lhs), Some(_)) => Some(lhs),
                    (lhs, rhs) => lhs.or(rhs),
                }
            }
        }
    }

    /// Evaluates the expression against a single row. Used for row-local
    /// constraint checks, so aggregates, aliases and sub-plans (which need the
    /// store) can't be evaluated. Follows SQLite's NULL semantics.
    pub fn evaluate(&self, row: &Row) -> Result<Value> {
        use Value::*;
        Ok(match self {
            Self::Column(column) => row.get(&column.name).cloned().unwrap_or(Null),
            Self::Literal(value) => value.clone(),
            Self::Outer(_)
            | Self::Alias(_)
            | Self::Aggregate(_)
            | Self::Raw { .. }
            | Self::Subquery(_) => {
                return errbuild!("can't evaluate {self} against a single row")
            }

            Self::Function(function, args) => {
                let args: Vec<Value> = args.iter().map(|a| a.evaluate(row)).collect::<Result<_>>()?;
                evaluate_function(*function, args)?
            }
            Self::Case { branches, otherwise } => {
                for (when, then) in branches {
                    if when.evaluate(row)?.truthy() == Some(true) {
                        return then.evaluate(row);
                    }
                }
                match otherwise {
                    Some(expr) => expr.evaluate(row)?,
                    None => Null,
                }
            }

            // Logical operations
            Self::And(lhs, rhs) => {
                match (lhs.evaluate(row)?.truthy(), rhs.evaluate(row)?.truthy()) {
                    (Some(false), _) | (_, Some(false)) => Boolean(false),
                    (Some(true), Some(true)) => Boolean(true),
                    _ => Null,
                }
            }
            Self::Or(lhs, rhs) => match (lhs.evaluate(row)?.truthy(), rhs.evaluate(row)?.truthy()) {
                (Some(true), _) | (_, Some(true)) => Boolean(true),
                (Some(false), Some(false)) => Boolean(false),
                _ => Null,
            },
            Self::Not(expr) => match expr.evaluate(row)?.truthy() {
                Some(b) => Boolean(!b),
                None => Null,
            },

            // Comparison operations
            Self::Between(expr, low, high) => {
                let value = expr.evaluate(row)?;
                let low = compare(&value, &low.evaluate(row)?);
                let high = compare(&value, &high.evaluate(row)?);
                match (low, high) {
                    (Some(low), Some(high)) => Boolean(low.is_ge() && high.is_le()),
                    _ => Null,
                }
            }
            Self::Equal(lhs, rhs) => compare_with(lhs, rhs, row, |o| o.is_eq())?,
            Self::NotEqual(lhs, rhs) => compare_with(lhs, rhs, row, |o| o.is_ne())?,
            Self::GreaterThan(lhs, rhs) => compare_with(lhs, rhs, row, |o| o.is_gt())?,
            Self::GreaterThanOrEqual(lhs, rhs) => compare_with(lhs, rhs, row, |o| o.is_ge())?,
            Self::LessThan(lhs, rhs) => compare_with(lhs, rhs, row, |o| o.is_lt())?,
            Self::LessThanOrEqual(lhs, rhs) => compare_with(lhs, rhs, row, |o| o.is_le())?,
            Self::InSet(expr, values) => match expr.evaluate(row)? {
                Null => Null,
                value => {
                    Boolean(values.iter().any(|v| compare(&value, v).is_some_and(|o| o.is_eq())))
                }
            },
            Self::IsNull(expr) => Boolean(expr.evaluate(row)?.is_null()),
            Self::IsNotNull(expr) => Boolean(!expr.evaluate(row)?.is_null()),
            Self::Like(lhs, rhs) => match (lhs.evaluate(row)?, rhs.evaluate(row)?) {
                (Null, _) | (_, Null) => Null,
                (value, Text(pattern)) => {
                    Boolean(like_regex(&pattern)?.is_match(&value.to_string()))
                }
                (_, pattern) => return errexec!("invalid LIKE pattern {pattern}"),
            },

            // Mathematical operations
            Self::Add(lhs, rhs) => numeric(lhs, row)?.checked_add(&numeric(rhs, row)?)?,
            Self::Subtract(lhs, rhs) => numeric(lhs, row)?.checked_sub(&numeric(rhs, row)?)?,
            Self::Multiply(lhs, rhs) => numeric(lhs, row)?.checked_mul(&numeric(rhs, row)?)?,
            Self::Divide(lhs, rhs) => numeric(lhs, row)?.checked_div(&numeric(rhs, row)?)?,
            Self::IntegerDivide(lhs, rhs) => {
                numeric(lhs, row)?.checked_int_div(&numeric(rhs, row)?)?
            }
        })
    }

    /// Walks the expression tree, calling a closure for every node. Halts if
    /// the closure returns false. Does not descend into sub-plans.
    pub fn walk<'a>(&'a self, visitor: &mut impl FnMut(&'a Expression) -> bool) -> bool {
        if !visitor(self) {
            return false;
        }
        match self {
            Self::And(lhs, rhs)
            | Self::Or(lhs, rhs)
            | Self::Equal(lhs, rhs)
            | Self::NotEqual(lhs, rhs)
            | Self::GreaterThan(lhs, rhs)
            | Self::GreaterThanOrEqual(lhs, rhs)
            | Self::LessThan(lhs, rhs)
            | Self::LessThanOrEqual(lhs, rhs)
            | Self::Like(lhs, rhs)
            | Self::Add(lhs, rhs)
            | Self::Divide(lhs, rhs)
            | Self::IntegerDivide(lhs, rhs)
            | Self::Multiply(lhs, rhs)
            | Self::Subtract(lhs, rhs) => lhs.walk(visitor) && rhs.walk(visitor),

            Self::Between(expr, low, high) => {
                expr.walk(visitor) && low.walk(visitor) && high.walk(visitor)
            }
            Self::Not(expr) | Self::IsNull(expr) | Self::IsNotNull(expr) | Self::InSet(expr, _) => {
                expr.walk(visitor)
            }
            Self::Aggregate(aggregate) => aggregate.expr().map_or(true, |e| e.walk(visitor)),
            Self::Function(_, args) => args.iter().all(|arg| arg.walk(visitor)),
            Self::Case { branches, otherwise } => {
                branches.iter().all(|(when, then)| when.walk(visitor) && then.walk(visitor))
                    && otherwise.as_ref().map_or(true, |e| e.walk(visitor))
            }

            Self::Column(_)
            | Self::Outer(_)
            | Self::Literal(_)
            | Self::Alias(_)
            | Self::Raw { .. }
            | Self::Subquery(_) => true,
        }
    }

    /// Returns true if the closure returns true for any node in the tree.
    pub fn contains<'a>(&'a self, visitor: &impl Fn(&'a Expression) -> bool) -> bool {
        !self.walk(&mut |e| !visitor(e))
    }

    /// Returns true if the expression contains an aggregate function. Raw
    /// fragments are inspected for common aggregate function names.
    pub fn is_aggregate(&self) -> bool {
        self.contains(&|expr| match expr {
            Self::Aggregate(_) => true,
            Self::Raw { sql, .. } => {
                let sql = sql.to_uppercase();
                ["COUNT(", "SUM(", "AVG(", "MIN(", "MAX(", "TOTAL(", "GROUP_CONCAT("]
                    .iter()
                    .any(|name| sql.contains(name))
            }
            _ => false,
        })
    }

    /// Returns true if the expression operates on text, e.g. via LIKE or
    /// length(). Used to order string checks after numeric checks.
    pub fn is_textual(&self) -> bool {
        self.contains(&|expr| {
            matches!(
                expr,
                Self::Like(..)
                    | Self::Function(Function::Length | Function::Lower | Function::Upper, _)
                    | Self::Literal(Value::Text(_))
            )
        })
    }

    /// Returns the column references in the expression, excluding sub-plans.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut columns = Vec::new();
        self.walk(&mut |expr| {
            if let Self::Column(column) = expr {
                columns.push(column);
            }
            true
        });
        columns
    }

    /// Returns the aliases referenced by the expression.
    pub fn aliases(&self) -> Vec<&str> {
        let mut aliases = Vec::new();
        self.walk(&mut |expr| {
            if let Self::Alias(alias) = expr {
                aliases.push(alias.as_str());
            }
            true
        });
        aliases
    }

    /// Wraps the expression in a projection with the given alias.
    pub fn alias(self, alias: &str) -> Projected {
        Projected::new(self, Some(alias))
    }

    /// Orders by the expression ascending.
    pub fn asc(self) -> (Expression, Direction) {
        (self, Direction::Ascending)
    }

    /// Orders by the expression descending.
    pub fn desc(self) -> (Expression, Direction) {
        (self, Direction::Descending)
    }

    /// Conjoins the expression with another.
    pub fn and(self, rhs: Expression) -> Expression {
        Self::And(Box::new(self), Box::new(rhs))
    }

    /// Disjoins the expression with another.
    pub fn or(self, rhs: Expression) -> Expression {
        Self::Or(Box::new(self), Box::new(rhs))
    }
}

/// Formats the expression as inline SQL, with literals embedded.
impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match Compiler::inline().expression(self) {
            Ok(sql) => f.write_str(&sql),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

impl From<Value> for Expression {
    fn from(value: Value) -> Self {
        Expression::Literal(value)
    }
}

impl From<ColumnRef> for Expression {
    fn from(column: ColumnRef) -> Self {
        Expression::Column(column)
    }
}

impl From<Aggregate> for Expression {
    fn from(aggregate: Aggregate) -> Self {
        Expression::Aggregate(aggregate)
    }
}

impl From<Query> for Expression {
    fn from(query: Query) -> Self {
        Expression::Subquery(Box::new(query))
    }
}

macro_rules! literal_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Expression {
                fn from(v: $t) -> Self {
                    Expression::Literal(v.into())
                }
            }
        )*
    };
}

literal_from!(bool, i32, i64, f64, String, &str);

/// Compares two values using SQLite's cross-type ordering: NULL is
/// incomparable, numbers sort before text, booleans compare as integers.
fn compare(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    use std::cmp::Ordering;
    let normalize = |v: &Value| match v {
        Value::Boolean(b) => Value::Integer(*b as i64),
        v => v.clone(),
    };
    match (normalize(lhs), normalize(rhs)) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Text(_), Value::Integer(_) | Value::Real(_)) => Some(Ordering::Greater),
        (Value::Integer(_) | Value::Real(_), Value::Text(_)) => Some(Ordering::Less),
        (lhs, rhs) => lhs.partial_cmp(&rhs),
    }
}

fn compare_with(
    lhs: &Expression,
    rhs: &Expression,
    row: &Row,
    predicate: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value> {
    Ok(match compare(&lhs.evaluate(row)?, &rhs.evaluate(row)?) {
        Some(ordering) => Value::Boolean(predicate(ordering)),
        None => Value::Null,
    })
}

/// Evaluates an operand for arithmetic, treating booleans as integers.
fn numeric(expr: &Expression, row: &Row) -> Result<Value> {
    Ok(match expr.evaluate(row)? {
        Value::Boolean(b) => Value::Integer(b as i64),
        value => value,
    })
}

/// Checks a function's argument count.
fn arity(function: Function, args: &[Value], n: usize) -> Result<()> {
    if args.len() != n {
        return errbuild!("{}() takes {n} arguments, got {}", function.name(), args.len());
    }
    Ok(())
}

fn evaluate_function(function: Function, mut args: Vec<Value>) -> Result<Value> {
    use Value::*;
    Ok(match function {
        Function::Coalesce => args.into_iter().find(|v| !v.is_null()).unwrap_or(Null),
        Function::Length => {
            arity(function, &args, 1)?;
            match args.remove(0) {
                Null => Null,
                value => Integer(value.to_string().chars().count() as i64),
            }
        }
        Function::Lower | Function::Upper => {
            arity(function, &args, 1)?;
            match args.remove(0) {
                Null => Null,
                value if function == Function::Lower => Text(value.to_string().to_lowercase()),
                value => Text(value.to_string().to_uppercase()),
            }
        }
        Function::Abs => {
            arity(function, &args, 1)?;
            match args.remove(0) {
                Integer(i) => match i.checked_abs() {
                    Some(i) => Integer(i),
                    None => return errexec!("integer overflow"),
                },
                Real(f) => Real(f.abs()),
                Null => Null,
                value => return errexec!("can't take absolute value of {value}"),
            }
        }
        Function::Floor => {
            arity(function, &args, 1)?;
            match args.remove(0) {
                Integer(i) => Integer(i),
                Real(f) => Real(f.floor()),
                Null => Null,
                value => return errexec!("can't floor {value}"),
            }
        }
        Function::Round => {
            let digits = match args.get(1) {
                Some(Integer(digits)) => *digits as i32,
                Some(Null) => return Ok(Null),
                Some(value) => return errexec!("invalid rounding precision {value}"),
                None => 0,
            };
            match args.first() {
                Some(Integer(i)) => Real(*i as f64),
                Some(Real(f)) => {
                    let scale = 10f64.powi(digits);
                    Real((f * scale).round() / scale)
                }
                Some(Null) | None => Null,
                Some(value) => return errexec!("can't round {value}"),
            }
        }
    })
}

/// Converts a LIKE pattern to a case-insensitive anchored regex. % matches
/// any sequence and _ any single character.
fn like_regex(pattern: &str) -> Result<Regex> {
    let mut regex = String::from("(?is)^");
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    Ok(Regex::new(&regex)?)
}
