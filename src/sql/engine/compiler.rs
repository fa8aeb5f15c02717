use crate::errbuild;
use crate::error::Result;
use crate::sql::planner::{
    Delete, Direction, GroupingMode, JoinKind, OutputColumn, Query, Scope, Source, Update,
};
use crate::sql::schema::Table;
use crate::sql::types::{ColumnRef, Expression, Row, Value};

use itertools::Itertools as _;

/// A compiled statement: SQL text with numbered parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub sql: String,
    /// Bound to ?1, ?2, ... in order.
    pub params: Vec<Value>,
    /// The result columns. Empty for writes.
    pub columns: Vec<OutputColumn>,
}

/// Compiles plans, writes and expressions into SQLite SQL.
///
/// Literals are bound as numbered parameters, except in inline mode, where
/// they're embedded as SQL literals. Inline mode is used where parameters
/// aren't allowed (CHECK clauses in DDL) and for display.
#[derive(Debug, Default)]
pub struct Compiler {
    inline: bool,
    params: Vec<Value>,
}

impl Compiler {
    /// Creates a compiler binding literals as parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a compiler embedding literals inline.
    pub fn inline() -> Self {
        Self { inline: true, params: Vec::new() }
    }

    /// Compiles a query plan, checking it first. CTE bindings become a WITH
    /// prefix, and clauses are emitted in canonical order whatever order they
    /// were built in.
    pub fn compile(mut self, query: &Query, mode: GroupingMode) -> Result<Statement> {
        query.validate(mode)?;
        let scope = Scope::root(query);
        let columns = scope.output_columns()?;
        let sql = self.query(Some(&scope), query)?;
        Ok(Statement { sql, params: self.params, columns })
    }

    /// Compiles an INSERT. Absent columns are omitted, so the store applies
    /// defaults and assigns row ids.
    pub fn insert(mut self, table: &Table, row: &Row) -> Result<Statement> {
        let name = format_ident(&table.name);
        let sql = if row.is_empty() {
            format!("INSERT INTO {name} DEFAULT VALUES")
        } else {
            let columns = row.columns().map(format_ident).join(", ");
            let values = row.iter().map(|(_, value)| self.literal(value)).join(", ");
            format!("INSERT INTO {name} ({columns}) VALUES ({values})")
        };
        Ok(Statement { sql, params: self.params, columns: Vec::new() })
    }

    /// Compiles an UPDATE.
    pub fn update(mut self, update: &Update) -> Result<Statement> {
        if update.set.is_empty() {
            return errbuild!("update of {} assigns no columns", update.table.name);
        }
        let set = update
            .set
            .iter()
            .map(|(column, value)| format!("{} = {}", format_ident(column), self.literal(value)))
            .join(", ");
        let mut sql = format!("UPDATE {} SET {set}", format_ident(&update.table.name));
        if let Some(filter) = &update.filter {
            let query = Query::new().from(&update.table);
            sql += &format!(" WHERE {}", self.expr(Some(&Scope::root(&query)), filter)?);
        }
        Ok(Statement { sql, params: self.params, columns: Vec::new() })
    }

    /// Compiles a DELETE.
    pub fn delete(mut self, delete: &Delete) -> Result<Statement> {
        let mut sql = format!("DELETE FROM {}", format_ident(&delete.table.name));
        if let Some(filter) = &delete.filter {
            let query = Query::new().from(&delete.table);
            sql += &format!(" WHERE {}", self.expr(Some(&Scope::root(&query)), filter)?);
        }
        Ok(Statement { sql, params: self.params, columns: Vec::new() })
    }

    /// Renders a standalone expression. Columns are rendered as written.
    pub fn expression(&mut self, expr: &Expression) -> Result<String> {
        self.expr(None, expr)
    }

    /// Renders a query. Without a scope, columns are rendered as written and
    /// the plan isn't resolved against its sources.
    fn query(&mut self, scope: Option<&Scope>, query: &Query) -> Result<String> {
        let mut sql = String::new();
        if !query.ctes.is_empty() {
            let mut ctes = Vec::with_capacity(query.ctes.len());
            for cte in &query.ctes {
                let body = match scope {
                    Some(scope) => self.query(Some(&scope.cte_body(&cte.query)), &cte.query)?,
                    None => self.query(None, &cte.query)?,
                };
                ctes.push(format!("{} AS ({body})", format_ident(&cte.name)));
            }
            sql += &format!("WITH {} ", ctes.join(", "));
        }

        sql += "SELECT ";
        if query.projection.is_empty() {
            sql += "*";
        } else {
            let mut projection = Vec::with_capacity(query.projection.len());
            for projected in &query.projection {
                let expr = self.expr(scope, &projected.expr)?;
                projection.push(match &projected.alias {
                    Some(alias) => format!("{expr} AS {}", format_ident(alias)),
                    None => expr,
                });
            }
            sql += &projection.join(", ");
        }

        let Some(source) = &query.source else {
            return errbuild!("query has no source");
        };
        sql += &format!(" FROM {}", Self::source(source));
        for join in &query.joins {
            let kind = match join.kind {
                JoinKind::Inner => "INNER",
                JoinKind::Left => "LEFT",
            };
            let on = self.expr(scope, &join.on)?;
            sql += &format!(" {kind} JOIN {} ON {on}", Self::source(&join.source));
        }
        if let Some(filter) = &query.filter {
            sql += &format!(" WHERE {}", self.expr(scope, filter)?);
        }
        if !query.group_by.is_empty() {
            sql += &format!(" GROUP BY {}", self.list(scope, &query.group_by)?);
        }
        if let Some(having) = &query.having {
            sql += &format!(" HAVING {}", self.expr(scope, having)?);
        }
        if !query.order_by.is_empty() {
            let mut orders = Vec::with_capacity(query.order_by.len());
            for (expr, direction) in &query.order_by {
                let direction = match direction {
                    Direction::Ascending => "ASC",
                    Direction::Descending => "DESC",
                };
                orders.push(format!("{} {direction}", self.expr(scope, expr)?));
            }
            sql += &format!(" ORDER BY {}", orders.join(", "));
        }
        match (query.limit, query.offset) {
            (Some(limit), Some(offset)) => sql += &format!(" LIMIT {limit} OFFSET {offset}"),
            (Some(limit), None) => sql += &format!(" LIMIT {limit}"),
            // SQLite only accepts OFFSET after LIMIT. -1 is unbounded.
            (None, Some(offset)) => sql += &format!(" LIMIT -1 OFFSET {offset}"),
            (None, None) => {}
        }
        Ok(sql)
    }

    fn source(source: &Source) -> String {
        let name = format_ident(source.base());
        match source {
            Source::Table { alias: Some(alias), .. } | Source::Cte { alias: Some(alias), .. } => {
                format!("{name} AS {}", format_ident(alias))
            }
            _ => name,
        }
    }

    fn list(&mut self, scope: Option<&Scope>, exprs: &[Expression]) -> Result<String> {
        let mut items = Vec::with_capacity(exprs.len());
        for expr in exprs {
            items.push(self.expr(scope, expr)?);
        }
        Ok(items.join(", "))
    }

    fn literal(&mut self, value: &Value) -> String {
        if self.inline {
            return value.as_sql();
        }
        self.params.push(value.clone());
        format!("?{}", self.params.len())
    }

    /// Renders an expression operand, parenthesized if it binds looser than
    /// the given precedence.
    fn operand(&mut self, scope: Option<&Scope>, expr: &Expression, min: u8) -> Result<String> {
        let sql = self.expr(scope, expr)?;
        Ok(if precedence(expr) < min { format!("({sql})") } else { sql })
    }

    /// Renders an infix operation. Right operands of equal precedence are
    /// parenthesized, to keep the tree's shape.
    fn infix(
        &mut self,
        scope: Option<&Scope>,
        lhs: &Expression,
        op: &str,
        rhs: &Expression,
        prec: u8,
    ) -> Result<String> {
        let lhs = self.operand(scope, lhs, prec)?;
        let rhs = self.operand(scope, rhs, prec + 1)?;
        Ok(format!("{lhs} {op} {rhs}"))
    }

    fn expr(&mut self, scope: Option<&Scope>, expr: &Expression) -> Result<String> {
        use Expression::*;
        // Comparison operands never chain.
        const CMP: u8 = 5;
        Ok(match expr {
            Column(column) => self.column(scope, column)?,
            Outer(column) => match scope {
                Some(scope) => {
                    let (source, _) = scope.resolve_outer(column)?;
                    qualified(Some(&source), &column.name)
                }
                None => qualified(column.table.as_deref(), &column.name),
            },
            Literal(value) => self.literal(value),
            Alias(alias) => format_ident(alias),
            Aggregate(aggregate) => {
                let name = aggregate.name();
                match aggregate.expr() {
                    Some(arg) => format!("{name}({})", self.expr(scope, arg)?),
                    None => format!("{name}(*)"),
                }
            }
            Raw { sql, .. } => sql.clone(),
            Function(function, args) => format!("{}({})", function.name(), self.list(scope, args)?),
            Case { branches, otherwise } => {
                let mut sql = "CASE".to_string();
                for (when, then) in branches {
                    let when = self.expr(scope, when)?;
                    let then = self.expr(scope, then)?;
                    sql += &format!(" WHEN {when} THEN {then}");
                }
                if let Some(otherwise) = otherwise {
                    sql += &format!(" ELSE {}", self.expr(scope, otherwise)?);
                }
                sql + " END"
            }
            Subquery(query) => {
                let sql = match scope {
                    Some(scope) => self.query(Some(&scope.child(query)), query)?,
                    None => self.query(None, query)?,
                };
                format!("({sql})")
            }

            And(lhs, rhs) => self.infix(scope, lhs, "AND", rhs, 2)?,
            Or(lhs, rhs) => self.infix(scope, lhs, "OR", rhs, 1)?,
            Not(expr) => format!("NOT {}", self.operand(scope, expr, 3)?),

            Between(expr, low, high) => {
                let expr = self.operand(scope, expr, CMP)?;
                let low = self.operand(scope, low, CMP)?;
                let high = self.operand(scope, high, CMP)?;
                format!("{expr} BETWEEN {low} AND {high}")
            }
            Equal(lhs, rhs) => self.infix(scope, lhs, "=", rhs, CMP)?,
            NotEqual(lhs, rhs) => self.infix(scope, lhs, "!=", rhs, CMP)?,
            GreaterThan(lhs, rhs) => self.infix(scope, lhs, ">", rhs, CMP)?,
            GreaterThanOrEqual(lhs, rhs) => self.infix(scope, lhs, ">=", rhs, CMP)?,
            LessThan(lhs, rhs) => self.infix(scope, lhs, "<", rhs, CMP)?,
            LessThanOrEqual(lhs, rhs) => self.infix(scope, lhs, "<=", rhs, CMP)?,
            Like(lhs, rhs) => self.infix(scope, lhs, "LIKE", rhs, CMP)?,
            InSet(expr, values) => {
                let expr = self.operand(scope, expr, CMP)?;
                let values = values.iter().map(|v| self.literal(v)).join(", ");
                format!("{expr} IN ({values})")
            }
            IsNull(expr) => format!("{} IS NULL", self.operand(scope, expr, CMP)?),
            IsNotNull(expr) => format!("{} IS NOT NULL", self.operand(scope, expr, CMP)?),

            Add(lhs, rhs) => self.infix(scope, lhs, "+", rhs, 6)?,
            Subtract(lhs, rhs) => self.infix(scope, lhs, "-", rhs, 6)?,
            Multiply(lhs, rhs) => self.infix(scope, lhs, "*", rhs, 7)?,
            // Integer operands would truncate, so the dividend is cast.
            Divide(lhs, rhs) => {
                let lhs = self.expr(scope, lhs)?;
                let rhs = self.operand(scope, rhs, 8)?;
                format!("CAST({lhs} AS REAL) / {rhs}")
            }
            IntegerDivide(lhs, rhs) => self.infix(scope, lhs, "/", rhs, 7)?,
        })
    }

    /// Renders a column. Columns are qualified by the source they resolve to
    /// where the scope requires it, and qualified references to an aliased
    /// table use the alias.
    fn column(&self, scope: Option<&Scope>, column: &ColumnRef) -> Result<String> {
        let resolved = match scope {
            Some(scope) => scope.resolve_column(column)?,
            None => None,
        };
        let qualifies = scope.is_some_and(|scope| scope.qualifies());
        let table = match (resolved, &column.table) {
            (Some(source), Some(_)) => Some(source),
            (Some(source), None) if qualifies => Some(source),
            (_, table) => table.clone(),
        };
        Ok(qualified(table.as_deref(), &column.name))
    }
}

/// Binding strength of an expression's outermost operator. Higher binds
/// tighter.
fn precedence(expr: &Expression) -> u8 {
    use Expression::*;
    match expr {
        Or(..) => 1,
        And(..) => 2,
        Not(_) => 3,
        Between(..) | Equal(..) | NotEqual(..) | GreaterThan(..) | GreaterThanOrEqual(..)
        | LessThan(..) | LessThanOrEqual(..) | Like(..) | InSet(..) | IsNull(_)
        | IsNotNull(_) => 4,
        Add(..) | Subtract(..) => 6,
        Multiply(..) | Divide(..) | IntegerDivide(..) => 7,
        // Raw fragments are opaque, so anything but a plain name is wrapped.
        Raw { sql, .. } if !sql.chars().all(|c| c.is_ascii_alphanumeric() || "_.".contains(c)) => {
            0
        }
        Column(_) | Outer(_) | Literal(_) | Alias(_) | Aggregate(_) | Raw { .. }
        | Function(..) | Case { .. } | Subquery(_) => 9,
    }
}

fn qualified(table: Option<&str>, name: &str) -> String {
    match table {
        Some(table) => format!("{}.{}", format_ident(table), format_ident(name)),
        None => format_ident(name),
    }
}

/// SQLite's keywords, sorted. Identifiers matching one are quoted.
const KEYWORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ALWAYS", "ANALYZE", "AND", "AS", "ASC",
    "ATTACH", "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE", "CAST",
    "CHECK", "COLLATE", "COLUMN", "COMMIT", "CONFLICT", "CONSTRAINT", "CREATE", "CROSS",
    "CURRENT", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATABASE", "DEFAULT",
    "DEFERRABLE", "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DO", "DROP", "EACH",
    "ELSE", "END", "ESCAPE", "EXCEPT", "EXCLUDE", "EXCLUSIVE", "EXISTS", "EXPLAIN", "FAIL",
    "FILTER", "FIRST", "FOLLOWING", "FOR", "FOREIGN", "FROM", "FULL", "GENERATED", "GLOB",
    "GROUP", "GROUPS", "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX", "INDEXED",
    "INITIALLY", "INNER", "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN", "KEY",
    "LAST", "LEFT", "LIKE", "LIMIT", "MATCH", "MATERIALIZED", "NATURAL", "NO", "NOT", "NOTHING",
    "NOTNULL", "NULL", "NULLS", "OF", "OFFSET", "ON", "OR", "ORDER", "OTHERS", "OUTER", "OVER",
    "PARTITION", "PLAN", "PRAGMA", "PRECEDING", "PRIMARY", "QUERY", "RAISE", "RANGE",
    "RECURSIVE", "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE", "RESTRICT",
    "RETURNING", "RIGHT", "ROLLBACK", "ROW", "ROWS", "SAVEPOINT", "SELECT", "SET", "TABLE",
    "TEMP", "TEMPORARY", "THEN", "TIES", "TO", "TRANSACTION", "TRIGGER", "UNBOUNDED", "UNION",
    "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW", "VIRTUAL", "WHEN", "WHERE",
    "WINDOW", "WITH", "WITHOUT",
];

/// Formats an identifier, quoting it if it isn't a plain name or clashes
/// with a keyword.
pub fn format_ident(ident: &str) -> String {
    let plain = ident.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && KEYWORDS.binary_search(&ident.to_ascii_uppercase().as_str()).is_err();
    if plain {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}
