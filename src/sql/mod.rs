pub mod dsl;
pub mod engine;
pub mod planner;
pub mod schema;
pub mod shaper;
pub mod types;
pub mod validator;

pub use engine::{Pending, Statement, Store, Worker};
pub use planner::{Delete, Direction, GroupingMode, JoinKind, Query, Source, Update};
pub use schema::{Column, Registry, Table};
pub use shaper::{Casing, Record};
pub use types::{DataType, Expression, Row, Value};
