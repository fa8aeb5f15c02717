use super::query::{Direction, JoinKind, Projected, Query, Source};
use crate::sql::types::Expression;

use itertools::Itertools as _;

/// A node in the EXPLAIN tree of a plan. Nodes are arranged in canonical
/// evaluation order regardless of the order the builder calls were made in:
/// sources and joins at the leaves, then filtering, aggregation, group
/// filtering, projection, ordering and finally offset and limit at the root.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// Binds CTEs for the body.
    With { ctes: Vec<Node>, body: Box<Node> },
    /// A CTE binding.
    Cte { name: String, source: Box<Node> },
    Scan { source: String },
    Join { left: Box<Node>, right: Box<Node>, kind: JoinKind, on: Expression },
    Filter { source: Box<Node>, predicate: Expression },
    Aggregate { source: Box<Node>, group_by: Vec<Expression>, aggregates: Vec<Expression> },
    Projection { source: Box<Node>, projection: Vec<Projected> },
    Order { source: Box<Node>, orders: Vec<(Expression, Direction)> },
    Offset { source: Box<Node>, offset: u64 },
    Limit { source: Box<Node>, limit: u64 },
    /// A plan without a source.
    Nothing,
}

impl Node {
    /// Builds the EXPLAIN tree for a plan.
    pub fn build(query: &Query) -> Self {
        let mut node = match &query.source {
            Some(source) => Self::scan(source),
            None => Self::Nothing,
        };
        for join in &query.joins {
            node = Self::Join {
                left: Box::new(node),
                right: Box::new(Self::scan(&join.source)),
                kind: join.kind,
                on: join.on.clone(),
            };
        }
        if let Some(predicate) = &query.filter {
            node = Self::Filter { source: Box::new(node), predicate: predicate.clone() };
        }

        let aggregates = query
            .projection
            .iter()
            .map(|p| &p.expr)
            .chain(query.having.iter())
            .chain(query.order_by.iter().map(|(e, _)| e))
            .flat_map(|expr| {
                let mut aggregates = Vec::new();
                expr.walk(&mut |e| {
                    if let Expression::Aggregate(_) = e {
                        aggregates.push(e.clone());
                    }
                    true
                });
                aggregates
            })
            .unique_by(|e| e.to_string())
            .collect_vec();
        if !query.group_by.is_empty() || !aggregates.is_empty() {
            node = Self::Aggregate {
                source: Box::new(node),
                group_by: query.group_by.clone(),
                aggregates,
            };
        }
        if let Some(predicate) = &query.having {
            node = Self::Filter { source: Box::new(node), predicate: predicate.clone() };
        }
        if !query.projection.is_empty() {
            let projection = query.projection.clone();
            node = Self::Projection { source: Box::new(node), projection };
        }
        if !query.order_by.is_empty() {
            node = Self::Order { source: Box::new(node), orders: query.order_by.clone() };
        }
        if let Some(offset) = query.offset {
            node = Self::Offset { source: Box::new(node), offset };
        }
        if let Some(limit) = query.limit {
            node = Self::Limit { source: Box::new(node), limit };
        }
        if !query.ctes.is_empty() {
            let ctes = query
                .ctes
                .iter()
                .map(|cte| Self::Cte {
                    name: cte.name.clone(),
                    source: Box::new(Self::build(&cte.query)),
                })
                .collect();
            node = Self::With { ctes, body: Box::new(node) };
        }
        node
    }

    fn scan(source: &Source) -> Self {
        let source = match source {
            Source::Table { table, alias: None } => table.name.clone(),
            Source::Table { table, alias: Some(alias) } => format!("{} as {alias}", table.name),
            Source::Cte { name, alias: None } => format!("{name} (cte)"),
            Source::Cte { name, alias: Some(alias) } => format!("{name} (cte) as {alias}"),
        };
        Self::Scan { source }
    }

    /// Recursively formats the node. Prefix is used for tree branches. root is
    /// true if this is the root (first) node, and last is used if this is the
    /// last node in this branch.
    pub fn format(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        mut prefix: String,
        root: bool,
        last: bool,
    ) -> std::fmt::Result {
        // If this is not the root node, emit a newline after the previous node.
        // This avoids a spurious newline at the end of the plan.
        if !root {
            writeln!(f)?;
        }

        // Prefix the node with a tree branch line. Modify the prefix for any
        // child nodes we'll recurse into.
        write!(f, "{prefix}")?;
        if !last {
            write!(f, "├─ ")?;
            prefix += "│  "
        } else if !root {
            write!(f, "└─ ")?;
            prefix += "   ";
        }

        match self {
            Self::With { ctes, body } => {
                write!(f, "With: {}", ctes.iter().filter_map(Self::cte_name).join(", "))?;
                for cte in ctes {
                    cte.format(f, prefix.clone(), false, false)?;
                }
                body.format(f, prefix, false, true)?;
            }
            Self::Cte { name, source } => {
                write!(f, "Cte: {name}")?;
                source.format(f, prefix, false, true)?;
            }
            Self::Scan { source } => write!(f, "Scan: {source}")?,
            Self::Join { left, right, kind, on } => {
                let kind = match kind {
                    JoinKind::Inner => "inner",
                    JoinKind::Left => "left",
                };
                write!(f, "Join: {kind} on {on}")?;
                left.format(f, prefix.clone(), false, false)?;
                right.format(f, prefix, false, true)?;
            }
            Self::Filter { source, predicate } => {
                write!(f, "Filter: {predicate}")?;
                source.format(f, prefix, false, true)?;
            }
            Self::Aggregate { source, group_by, aggregates } => {
                write!(f, "Aggregate: {}", group_by.iter().chain(aggregates).join(", "))?;
                source.format(f, prefix, false, true)?;
            }
            Self::Projection { source, projection } => {
                let projection = projection
                    .iter()
                    .map(|p| match &p.alias {
                        Some(alias) => format!("{} as {alias}", p.expr),
                        None => p.expr.to_string(),
                    })
                    .join(", ");
                write!(f, "Projection: {projection}")?;
                source.format(f, prefix, false, true)?;
            }
            Self::Order { source, orders } => {
                let orders = orders.iter().map(|(expr, dir)| format!("{expr} {dir}")).join(", ");
                write!(f, "Order: {orders}")?;
                source.format(f, prefix, false, true)?;
            }
            Self::Offset { source, offset } => {
                write!(f, "Offset: {offset}")?;
                source.format(f, prefix, false, true)?;
            }
            Self::Limit { source, limit } => {
                write!(f, "Limit: {limit}")?;
                source.format(f, prefix, false, true)?;
            }
            Self::Nothing => write!(f, "Nothing")?,
        }
        Ok(())
    }

    fn cte_name(node: &Node) -> Option<&str> {
        match node {
            Self::Cte { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.format(f, String::new(), true, true)
    }
}
