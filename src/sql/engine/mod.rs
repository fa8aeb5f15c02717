//! The execution adapter: compiles plans into SQLite SQL, runs them against
//! the embedded store, and maps the results back into records.

mod compiler;
mod store;
mod worker;

pub use compiler::{format_ident, Compiler, Statement};
pub use store::Store;
pub use worker::{Pending, Worker};
