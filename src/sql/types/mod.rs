mod expression;
mod row;
mod value;

pub use expression::{Aggregate, ColumnRef, Expression, Function};
pub use row::Row;
pub use value::{DataType, Value};
