use super::plan::Node;
use super::scope::{OutputColumn, Scope};
use crate::error::Result;
use crate::sql::schema::Table;
use crate::sql::types::{Expression, Row};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        })
    }
}

/// How strictly grouped queries are checked. SQLite itself is permissive:
/// a bare column in an aggregate query takes its value from an arbitrary row
/// of the group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingMode {
    /// Bare columns are allowed in grouped projections.
    #[default]
    Permissive,
    /// Every non-aggregate projection must appear in GROUP BY.
    Strict,
}

/// A projected expression with an optional output alias.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Projected {
    pub expr: Expression,
    pub alias: Option<String>,
}

impl Projected {
    pub fn new(expr: Expression, alias: Option<&str>) -> Self {
        Self { expr, alias: alias.map(str::to_string) }
    }

    /// The output name: the alias if given, else the column name, else the
    /// rendered expression.
    pub fn name(&self) -> String {
        match (&self.alias, &self.expr) {
            (Some(alias), _) => alias.clone(),
            (None, Expression::Column(column)) => column.name.clone(),
            (None, expr) => expr.to_string(),
        }
    }

    /// Returns true if the output name is a declared identifier rather than
    /// rendered expression text.
    pub fn is_declared(&self) -> bool {
        self.alias.is_some() || matches!(self.expr, Expression::Column(_))
    }
}

impl From<Expression> for Projected {
    fn from(expr: Expression) -> Self {
        Self::new(expr, None)
    }
}

/// A row source: a registered table or a CTE binding, optionally aliased.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Source {
    Table { table: Arc<Table>, alias: Option<String> },
    Cte { name: String, alias: Option<String> },
}

impl Source {
    /// References a CTE binding by name.
    pub fn cte(name: &str) -> Self {
        Self::Cte { name: name.to_string(), alias: None }
    }

    /// Aliases the source, e.g. to join a table with itself.
    pub fn alias(self, alias: &str) -> Self {
        let alias = Some(alias.to_string());
        match self {
            Self::Table { table, .. } => Self::Table { table, alias },
            Self::Cte { name, .. } => Self::Cte { name, alias },
        }
    }

    /// The name the source is referenced by in the query: its alias if any.
    pub fn name(&self) -> &str {
        match self {
            Self::Table { alias: Some(alias), .. } | Self::Cte { alias: Some(alias), .. } => alias,
            Self::Table { table, alias: None } => &table.name,
            Self::Cte { name, alias: None } => name,
        }
    }

    /// The underlying table or CTE name.
    pub fn base(&self) -> &str {
        match self {
            Self::Table { table, .. } => &table.name,
            Self::Cte { name, .. } => name,
        }
    }
}

impl From<Arc<Table>> for Source {
    fn from(table: Arc<Table>) -> Self {
        Self::Table { table, alias: None }
    }
}

impl From<&Arc<Table>> for Source {
    fn from(table: &Arc<Table>) -> Self {
        Self::Table { table: table.clone(), alias: None }
    }
}

/// A CTE binding, referenced by name like a table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cte {
    pub name: String,
    pub query: Query,
}

/// A join type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
}

/// A join against the preceding sources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub source: Source,
    pub on: Expression,
}

/// A builder call, recorded in call order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Clause {
    With,
    Select,
    From,
    Join,
    Where,
    GroupBy,
    Having,
    OrderBy,
    Limit,
    Offset,
}

/// A logical query plan. Each builder method consumes the plan and returns a
/// new one, so partial plans are shared by cloning them explicitly. Clauses
/// may be added in any order; compilation and EXPLAIN always use the
/// canonical order: from/join, where, group by, having, select, order by,
/// limit/offset.
///
/// Plans are checked when compiled or explained, not while building, so a
/// builder chain never fails halfway.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub(crate) ctes: Vec<Cte>,
    pub(crate) projection: Vec<Projected>,
    pub(crate) source: Option<Source>,
    pub(crate) joins: Vec<Join>,
    pub(crate) filter: Option<Expression>,
    pub(crate) group_by: Vec<Expression>,
    pub(crate) having: Option<Expression>,
    pub(crate) order_by: Vec<(Expression, Direction)>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) grouping: Option<GroupingMode>,
    calls: Vec<Clause>,
}

impl Query {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the projection. An empty projection selects every column
    /// of every source.
    pub fn select<P: Into<Projected>>(mut self, projection: impl IntoIterator<Item = P>) -> Self {
        self.projection.extend(projection.into_iter().map(Into::into));
        self.record(Clause::Select)
    }

    /// Sets the primary source.
    pub fn from(mut self, source: impl Into<Source>) -> Self {
        self.source = Some(source.into());
        self.record(Clause::From)
    }

    /// Adds a filter predicate. Repeated calls conjoin with AND.
    pub fn r#where(mut self, predicate: Expression) -> Self {
        self.filter = Some(conjoin(self.filter.take(), predicate));
        self.record(Clause::Where)
    }

    /// Appends grouping keys.
    pub fn group_by(mut self, keys: impl IntoIterator<Item = Expression>) -> Self {
        self.group_by.extend(keys);
        self.record(Clause::GroupBy)
    }

    /// Adds a group filter predicate. Repeated calls conjoin with AND.
    pub fn having(mut self, predicate: Expression) -> Self {
        self.having = Some(conjoin(self.having.take(), predicate));
        self.record(Clause::Having)
    }

    /// Appends ordering keys.
    pub fn order_by(mut self, orders: impl IntoIterator<Item = (Expression, Direction)>) -> Self {
        self.order_by.extend(orders);
        self.record(Clause::OrderBy)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self.record(Clause::Limit)
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self.record(Clause::Offset)
    }

    /// Binds a CTE, which the plan (and its sub-plans) can use as a source.
    pub fn with(mut self, name: &str, query: Query) -> Self {
        self.ctes.push(Cte { name: name.to_string(), query });
        self.record(Clause::With)
    }

    pub fn inner_join(self, source: impl Into<Source>, on: Expression) -> Self {
        self.join(JoinKind::Inner, source.into(), on)
    }

    pub fn left_join(self, source: impl Into<Source>, on: Expression) -> Self {
        self.join(JoinKind::Left, source.into(), on)
    }

    fn join(mut self, kind: JoinKind, source: Source, on: Expression) -> Self {
        self.joins.push(Join { kind, source, on });
        self.record(Clause::Join)
    }

    /// Overrides the store's grouping mode for this plan.
    pub fn grouping(mut self, mode: GroupingMode) -> Self {
        self.grouping = Some(mode);
        self
    }

    fn record(mut self, clause: Clause) -> Self {
        self.calls.push(clause);
        self
    }

    /// The builder calls in the order they were made.
    pub fn calls(&self) -> &[Clause] {
        &self.calls
    }

    /// The columns the plan produces, with names and types.
    pub fn output_columns(&self) -> Result<Vec<OutputColumn>> {
        Scope::root(self).output_columns()
    }

    /// Checks the plan for build errors, such as undefined aliases or
    /// duplicate CTE names.
    pub fn validate(&self, mode: GroupingMode) -> Result<()> {
        Scope::root(self).validate(self.grouping.unwrap_or(mode))
    }

    /// Renders the plan as an EXPLAIN tree, in canonical evaluation order.
    pub fn explain(&self) -> Result<String> {
        self.validate(GroupingMode::Permissive)?;
        Ok(Node::build(self).to_string())
    }
}

fn conjoin(existing: Option<Expression>, predicate: Expression) -> Expression {
    match existing {
        Some(existing) => existing.and(predicate),
        None => predicate,
    }
}

// Pure variants of the builder methods, leaving the original plan untouched.

pub fn with_select<P: Into<Projected>>(
    plan: &Query,
    projection: impl IntoIterator<Item = P>,
) -> Query {
    plan.clone().select(projection)
}

pub fn with_from(plan: &Query, source: impl Into<Source>) -> Query {
    plan.clone().from(source)
}

pub fn with_where(plan: &Query, predicate: Expression) -> Query {
    plan.clone().r#where(predicate)
}

pub fn with_group_by(plan: &Query, keys: impl IntoIterator<Item = Expression>) -> Query {
    plan.clone().group_by(keys)
}

pub fn with_having(plan: &Query, predicate: Expression) -> Query {
    plan.clone().having(predicate)
}

pub fn with_order_by(
    plan: &Query,
    orders: impl IntoIterator<Item = (Expression, Direction)>,
) -> Query {
    plan.clone().order_by(orders)
}

pub fn with_limit(plan: &Query, limit: u64) -> Query {
    plan.clone().limit(limit)
}

pub fn with_offset(plan: &Query, offset: u64) -> Query {
    plan.clone().offset(offset)
}

pub fn with_cte(plan: &Query, name: &str, query: Query) -> Query {
    plan.clone().with(name, query)
}

/// An UPDATE of the rows matching a predicate.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub table: Arc<Table>,
    pub set: Row,
    pub filter: Option<Expression>,
}

impl Update {
    pub fn new(table: &Arc<Table>) -> Self {
        Self { table: table.clone(), set: Row::new(), filter: None }
    }

    /// Assigns a column value.
    pub fn set(mut self, column: &str, value: impl Into<crate::sql::types::Value>) -> Self {
        self.set.set(column, value);
        self
    }

    /// Restricts the update to matching rows. Repeated calls conjoin with AND.
    pub fn r#where(mut self, predicate: Expression) -> Self {
        self.filter = Some(conjoin(self.filter.take(), predicate));
        self
    }
}

/// A DELETE of the rows matching a predicate.
#[derive(Clone, Debug, PartialEq)]
pub struct Delete {
    pub table: Arc<Table>,
    pub filter: Option<Expression>,
}

impl Delete {
    pub fn new(table: &Arc<Table>) -> Self {
        Self { table: table.clone(), filter: None }
    }

    pub fn r#where(mut self, predicate: Expression) -> Self {
        self.filter = Some(conjoin(self.filter.take(), predicate));
        self
    }
}
