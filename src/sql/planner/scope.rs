use super::query::{Cte, GroupingMode, Query, Source};
use crate::errbuild;
use crate::error::Result;
use crate::sql::types::{ColumnRef, DataType, Expression};

use std::collections::HashSet;

/// Sub-plans and CTE bodies nest at most this deep. Also stops CTEs that
/// reference themselves.
const MAX_DEPTH: usize = 32;

/// A column produced by a plan or source.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputColumn {
    pub name: String,
    pub datatype: Option<DataType>,
    /// False if the name is rendered expression text rather than a column
    /// name or alias. Casing conventions only apply to declared names.
    pub declared: bool,
}

/// A source's columns, under the name the query references it by.
#[derive(Clone, Debug)]
pub struct Bound {
    pub name: String,
    /// The table or CTE name, which differs from the name when aliased.
    pub base: String,
    pub columns: Vec<OutputColumn>,
}

/// A name resolution scope: a plan and the scopes enclosing it. Sub-plans in
/// expressions see the enclosing sources, for correlated references. CTE
/// bodies only see CTE bindings.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub query: &'a Query,
    parent: Option<&'a Scope<'a>>,
    correlated: bool,
    depth: usize,
}

impl<'a> Scope<'a> {
    /// A top-level scope.
    pub fn root(query: &'a Query) -> Self {
        Self { query, parent: None, correlated: false, depth: 0 }
    }

    /// A scope for a sub-plan nested in one of this scope's expressions.
    pub fn child<'b>(&'b self, query: &'b Query) -> Scope<'b> {
        Scope { query, parent: Some(self), correlated: true, depth: self.depth + 1 }
    }

    /// A scope for a CTE body bound in this scope or an enclosing one.
    pub fn cte_body<'b>(&'b self, query: &'b Query) -> Scope<'b> {
        Scope { query, parent: Some(self), correlated: false, depth: self.depth + 1 }
    }

    /// Returns true if unqualified columns must be qualified when compiled:
    /// in joins, and in correlated sub-plans whose enclosing sources may
    /// share column names.
    pub fn qualifies(&self) -> bool {
        self.correlated || !self.query.joins.is_empty()
    }

    /// The enclosing scope whose sources are visible, if any.
    fn enclosing(&self) -> Option<&'a Scope<'a>> {
        self.parent.filter(|_| self.correlated)
    }

    /// Looks up a CTE binding by name, innermost first.
    fn find_cte(&self, name: &str) -> Option<&'a Cte> {
        self.query
            .ctes
            .iter()
            .find(|cte| cte.name == name)
            .or_else(|| self.parent.and_then(|parent| parent.find_cte(name)))
    }

    /// Binds the plan's sources, in from/join order.
    pub fn sources(&self) -> Result<Vec<Bound>> {
        if self.depth > MAX_DEPTH {
            return errbuild!("plan nests too deeply, is a CTE recursive?");
        }
        let Some(source) = &self.query.source else {
            return errbuild!("query has no source");
        };
        std::iter::once(source)
            .chain(self.query.joins.iter().map(|join| &join.source))
            .map(|source| self.bind(source))
            .collect()
    }

    fn bind(&self, source: &Source) -> Result<Bound> {
        let columns = match source {
            Source::Table { table, .. } => table
                .columns
                .iter()
                .map(|c| OutputColumn {
                    name: c.name.clone(),
                    datatype: Some(c.datatype),
                    declared: true,
                })
                .collect(),
            Source::Cte { name, .. } => match self.find_cte(name) {
                Some(cte) => self.cte_body(&cte.query).output_columns()?,
                None => return errbuild!("unknown source {name}"),
            },
        };
        Ok(Bound { name: source.name().to_string(), base: source.base().to_string(), columns })
    }

    /// The columns the plan produces.
    pub fn output_columns(&self) -> Result<Vec<OutputColumn>> {
        let sources = self.sources()?;
        if self.query.projection.is_empty() {
            return Ok(sources.into_iter().flat_map(|source| source.columns).collect());
        }
        Ok(self
            .query
            .projection
            .iter()
            .map(|projected| OutputColumn {
                name: projected.name(),
                datatype: projected
                    .expr
                    .datatype_with(&|expr| self.leaf_type(expr, &sources, true)),
                declared: projected.is_declared(),
            })
            .collect())
    }

    /// Types columns, aliases and sub-plans against the scope.
    fn leaf_type(&self, expr: &Expression, sources: &[Bound], follow: bool) -> Option<DataType> {
        match expr {
            Expression::Column(column) => {
                column.datatype.or_else(|| lookup(sources, column).and_then(|(_, t)| t))
            }
            Expression::Outer(column) => {
                column.datatype.or_else(|| self.resolve_outer(column).ok().and_then(|(_, t)| t))
            }
            Expression::Subquery(query) => {
                self.child(query).output_columns().ok()?.first()?.datatype
            }
            Expression::Alias(alias) if follow => self
                .query
                .projection
                .iter()
                .find(|p| p.alias.as_deref() == Some(alias.as_str()))?
                .expr
                .datatype_with(&|expr| self.leaf_type(expr, sources, false)),
            _ => None,
        }
    }

    /// Resolves an unqualified or qualified column against the plan's own
    /// sources, returning the name of the source it belongs to. None if no
    /// source provides it, e.g. for projection aliases.
    pub fn resolve_column(&self, column: &ColumnRef) -> Result<Option<String>> {
        Ok(lookup(&self.sources()?, column).map(|(bound, _)| bound.name.clone()))
    }

    /// Resolves a correlated reference against the enclosing scopes,
    /// innermost first, returning the source name and column type.
    pub fn resolve_outer(&self, column: &ColumnRef) -> Result<(String, Option<DataType>)> {
        let mut scope = self.enclosing();
        while let Some(enclosing) = scope {
            if let Some((bound, datatype)) = lookup(&enclosing.sources()?, column) {
                return Ok((bound.name.clone(), column.datatype.or(datatype)));
            }
            scope = enclosing.enclosing();
        }
        errbuild!("outer reference {column} has no enclosing source")
    }

    /// Checks the plan and its CTEs and sub-plans for build errors.
    pub fn validate(&self, mode: GroupingMode) -> Result<()> {
        let query = self.query;

        let mut names = HashSet::new();
        for cte in &query.ctes {
            if !names.insert(cte.name.as_str()) {
                return errbuild!("duplicate CTE {}", cte.name);
            }
            self.cte_body(&cte.query).validate(mode)?;
        }

        let sources = self.sources()?;
        let mut names = HashSet::new();
        for source in &sources {
            if !names.insert(source.name.as_str()) {
                return errbuild!("source {} appears twice, alias one of them", source.name);
            }
        }

        let defined = self.defined_names(&sources)?;
        for expr in self.expressions() {
            if let Some(alias) = expr.aliases().into_iter().find(|a| !defined.contains(*a)) {
                return errbuild!("undefined alias {alias}");
            }
            let (mut outers, mut subqueries) = (Vec::new(), Vec::new());
            expr.walk(&mut |e| {
                match e {
                    Expression::Outer(column) => outers.push(column),
                    Expression::Subquery(query) => subqueries.push(query.as_ref()),
                    _ => {}
                }
                true
            });
            for column in outers {
                self.resolve_outer(column)?;
            }
            for subquery in subqueries {
                self.child(subquery).validate(mode)?;
            }
        }

        if let Some(filter) = &query.filter {
            if filter.contains(&|e| matches!(e, Expression::Aggregate(_))) {
                return errbuild!("aggregates are not allowed in WHERE, use HAVING");
            }
        }
        if mode == GroupingMode::Strict {
            self.validate_grouping()?;
        }
        Ok(())
    }

    /// Every expression in the plan, excluding CTE bodies.
    fn expressions(&self) -> impl Iterator<Item = &'a Expression> {
        let query = self.query;
        query
            .projection
            .iter()
            .map(|p| &p.expr)
            .chain(query.joins.iter().map(|j| &j.on))
            .chain(query.filter.iter())
            .chain(query.group_by.iter())
            .chain(query.having.iter())
            .chain(query.order_by.iter().map(|(e, _)| e))
    }

    /// Names an Alias expression may refer to: projection aliases of this
    /// and enclosing plans, source columns, and output columns of visible
    /// CTEs.
    fn defined_names(&self, sources: &[Bound]) -> Result<HashSet<String>> {
        let mut names: HashSet<String> = sources
            .iter()
            .flat_map(|source| source.columns.iter().map(|c| c.name.clone()))
            .collect();
        let mut scope = Some(self);
        while let Some(current) = scope {
            names.extend(current.query.projection.iter().filter_map(|p| p.alias.clone()));
            for cte in &current.query.ctes {
                let columns = self.cte_body(&cte.query).output_columns()?;
                names.extend(columns.into_iter().map(|c| c.name));
            }
            scope = current.parent;
        }
        Ok(names)
    }

    /// In strict mode, grouped plans may only project aggregates, constants
    /// and grouping keys.
    fn validate_grouping(&self) -> Result<()> {
        let query = self.query;
        let grouped = !query.group_by.is_empty()
            || query.projection.iter().any(|p| p.expr.is_aggregate())
            || query.having.is_some();
        if !grouped {
            return Ok(());
        }
        if query.projection.is_empty() {
            return errbuild!("can't select all columns of a grouped query");
        }
        for projected in &query.projection {
            let expr = &projected.expr;
            let constant = !expr.contains(&|e| {
                matches!(e, Expression::Column(_) | Expression::Outer(_) | Expression::Raw { .. })
            });
            let keyed = query.group_by.iter().any(|key| {
                key == expr
                    || matches!((key, &projected.alias), (Expression::Alias(k), Some(a)) if k == a)
            });
            if !(constant || keyed || expr.is_aggregate()) {
                return errbuild!(
                    "{} must appear in GROUP BY or be used in an aggregate",
                    projected.name()
                );
            }
        }
        Ok(())
    }
}

/// Looks up a column among bound sources. A qualified reference matches the
/// source name, or the base table name if exactly one source uses that
/// table. An unqualified reference matches the first source providing the
/// column.
fn lookup<'s>(sources: &'s [Bound], column: &ColumnRef) -> Option<(&'s Bound, Option<DataType>)> {
    let find = |bound: &Bound| {
        bound.columns.iter().find(|c| c.name == column.name).map(|c| c.datatype)
    };
    match &column.table {
        Some(table) => {
            let bound = sources.iter().find(|s| &s.name == table).or_else(|| {
                let mut matches = sources.iter().filter(|s| &s.base == table);
                let first = matches.next()?;
                matches.next().is_none().then_some(first)
            })?;
            Some((bound, find(bound).flatten()))
        }
        None => sources.iter().find_map(|s| find(s).map(|datatype| (s, datatype))),
    }
}
