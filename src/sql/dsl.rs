//! Free functions for building expressions and plans, e.g.
//! `select([col("director").into(), sum(col("revenue")).alias("total")])`.

use super::planner::{Direction, Projected, Query};
use super::types::{Aggregate, ColumnRef, DataType, Expression, Function, Value};

/// References a column by name. A `table.column` name is qualified by the
/// given source name or alias.
pub fn col(name: &str) -> Expression {
    Expression::Column(column_ref(name))
}

/// References a column of the enclosing query, for correlated sub-plans.
pub fn outer(name: &str) -> Expression {
    Expression::Outer(column_ref(name))
}

fn column_ref(name: &str) -> ColumnRef {
    match name.split_once('.') {
        Some((table, name)) => ColumnRef::new(Some(table), name, None),
        None => ColumnRef::new(None, name, None),
    }
}

/// A literal value.
pub fn lit(value: impl Into<Value>) -> Expression {
    Expression::Literal(value.into())
}

/// A raw SQL fragment with a declared result type.
pub fn raw(sql: &str, datatype: Option<DataType>) -> Expression {
    Expression::Raw { sql: sql.to_string(), datatype }
}

/// References a projection or CTE alias.
pub fn alias(name: &str) -> Expression {
    Expression::Alias(name.to_string())
}

/// A scalar sub-plan.
pub fn subquery(query: Query) -> Expression {
    Expression::Subquery(Box::new(query))
}

/// Starts a new plan with the given projection.
pub fn select<P: Into<Projected>>(projection: impl IntoIterator<Item = P>) -> Query {
    Query::new().select(projection)
}

// Aggregates

pub fn count_all() -> Expression {
    Aggregate::CountAll.into()
}

pub fn count(expr: impl Into<Expression>) -> Expression {
    Aggregate::Count(Box::new(expr.into())).into()
}

pub fn sum(expr: impl Into<Expression>) -> Expression {
    Aggregate::Sum(Box::new(expr.into())).into()
}

pub fn avg(expr: impl Into<Expression>) -> Expression {
    Aggregate::Average(Box::new(expr.into())).into()
}

pub fn min(expr: impl Into<Expression>) -> Expression {
    Aggregate::Min(Box::new(expr.into())).into()
}

pub fn max(expr: impl Into<Expression>) -> Expression {
    Aggregate::Max(Box::new(expr.into())).into()
}

// Logical operators

pub fn and(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::And(Box::new(lhs.into()), Box::new(rhs.into()))
}

pub fn or(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::Or(Box::new(lhs.into()), Box::new(rhs.into()))
}

pub fn not(expr: impl Into<Expression>) -> Expression {
    Expression::Not(Box::new(expr.into()))
}

// Comparisons

pub fn eq(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::Equal(Box::new(lhs.into()), Box::new(rhs.into()))
}

pub fn ne(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::NotEqual(Box::new(lhs.into()), Box::new(rhs.into()))
}

pub fn gt(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::GreaterThan(Box::new(lhs.into()), Box::new(rhs.into()))
}

pub fn gte(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::GreaterThanOrEqual(Box::new(lhs.into()), Box::new(rhs.into()))
}

pub fn lt(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::LessThan(Box::new(lhs.into()), Box::new(rhs.into()))
}

pub fn lte(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::LessThanOrEqual(Box::new(lhs.into()), Box::new(rhs.into()))
}

/// A LIKE pattern match, where % matches any sequence and _ any character.
pub fn like(lhs: impl Into<Expression>, pattern: impl Into<Expression>) -> Expression {
    Expression::Like(Box::new(lhs.into()), Box::new(pattern.into()))
}

pub fn is_null(expr: impl Into<Expression>) -> Expression {
    Expression::IsNull(Box::new(expr.into()))
}

pub fn is_not_null(expr: impl Into<Expression>) -> Expression {
    Expression::IsNotNull(Box::new(expr.into()))
}

pub fn in_set<V: Into<Value>>(
    expr: impl Into<Expression>,
    values: impl IntoIterator<Item = V>,
) -> Expression {
    Expression::InSet(Box::new(expr.into()), values.into_iter().map(Into::into).collect())
}

/// An inclusive range check: `low <= expr <= high`.
pub fn between(
    expr: impl Into<Expression>,
    low: impl Into<Expression>,
    high: impl Into<Expression>,
) -> Expression {
    Expression::Between(Box::new(expr.into()), Box::new(low.into()), Box::new(high.into()))
}

// Arithmetic

pub fn add(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::Add(Box::new(lhs.into()), Box::new(rhs.into()))
}

pub fn sub(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::Subtract(Box::new(lhs.into()), Box::new(rhs.into()))
}

pub fn mul(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::Multiply(Box::new(lhs.into()), Box::new(rhs.into()))
}

/// Division, always yielding a real.
pub fn div(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::Divide(Box::new(lhs.into()), Box::new(rhs.into()))
}

/// Integer division, truncating towards zero.
pub fn int_div(lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::IntegerDivide(Box::new(lhs.into()), Box::new(rhs.into()))
}

// Functions

pub fn func(function: Function, args: impl IntoIterator<Item = Expression>) -> Expression {
    Expression::Function(function, args.into_iter().collect())
}

pub fn length(expr: impl Into<Expression>) -> Expression {
    func(Function::Length, [expr.into()])
}

pub fn round(expr: impl Into<Expression>, digits: i64) -> Expression {
    func(Function::Round, [expr.into(), lit(digits)])
}

pub fn coalesce(args: impl IntoIterator<Item = Expression>) -> Expression {
    func(Function::Coalesce, args)
}

/// Starts a CASE expression from (condition, result) branches. Finish it
/// with `otherwise()` or `end()`.
pub fn case<W: Into<Expression>, T: Into<Expression>>(
    branches: impl IntoIterator<Item = (W, T)>,
) -> Case {
    Case(branches.into_iter().map(|(when, then)| (when.into(), then.into())).collect())
}

/// A CASE expression under construction.
#[derive(Clone, Debug)]
pub struct Case(Vec<(Expression, Expression)>);

impl Case {
    /// Finishes the CASE with an ELSE result.
    pub fn otherwise(self, otherwise: impl Into<Expression>) -> Expression {
        Expression::Case { branches: self.0, otherwise: Some(Box::new(otherwise.into())) }
    }

    /// Finishes the CASE without an ELSE, yielding NULL when nothing matches.
    pub fn end(self) -> Expression {
        Expression::Case { branches: self.0, otherwise: None }
    }
}

// Ordering

pub fn asc(expr: impl Into<Expression>) -> (Expression, Direction) {
    (expr.into(), Direction::Ascending)
}

pub fn desc(expr: impl Into<Expression>) -> (Expression, Direction) {
    (expr.into(), Direction::Descending)
}
