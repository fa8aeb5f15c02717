//! Logical query plans. A [`Query`] is built fluently from immutable steps,
//! checked against its sources when compiled or explained, and rendered as an
//! EXPLAIN tree in canonical evaluation order.

mod plan;
mod query;
mod scope;

pub use plan::Node;
pub use query::{
    with_cte, with_from, with_group_by, with_having, with_limit, with_offset, with_order_by,
    with_select, with_where, Clause, Cte, Delete, Direction, GroupingMode, Join, JoinKind,
    Projected, Query, Source, Update,
};
pub use scope::{Bound, OutputColumn, Scope};
