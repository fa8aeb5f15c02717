mod ddl;
mod dml;
mod query;
mod subquery;

use litequery::error::Result;
use litequery::sql::dsl::*;
use litequery::sql::{Column, DataType, Row, Store, Table};

use std::sync::Arc;

/// The movies table used throughout the suites.
fn movies() -> Result<Arc<Table>> {
    Ok(Arc::new(Table::new(
        "movies",
        vec![
            Column::new("movie_id", DataType::Integer).primary_key().autoincrement(),
            Column::new("title", DataType::Text).not_null().unique(),
            Column::new("released", DataType::Integer).not_null(),
            Column::new("overview", DataType::Text),
            Column::new("rating", DataType::Real).not_null().check(between(col("rating"), 0, 10)),
            Column::new("director", DataType::Text).not_null(),
            Column::new("for_kids", DataType::Boolean).not_null().default(false),
        ],
    )?))
}

/// A movie row.
fn movie(title: &str, released: i64, rating: f64, director: &str) -> Row {
    Row::new()
        .with("title", title)
        .with("released", released)
        .with("rating", rating)
        .with("director", director)
}

/// Sets up an in-memory store with the movies table and the given movies,
/// inserted in order.
fn setup(rows: Vec<Row>) -> Result<(Store, Arc<Table>)> {
    let store = Store::open_in_memory()?;
    let movies = movies()?;
    store.create_table(&movies)?;
    for row in rows {
        store.insert(&movies, row)?;
    }
    Ok((store, movies))
}

/// A small catalog with repeated release years and directors.
fn catalog() -> Vec<Row> {
    vec![
        movie("The Matrix", 1999, 8.7, "Lana Wachowski"),
        movie("Lion King", 1994, 9.9, "Roger Allers"),
        movie("Fight Club", 1999, 8.8, "David Fincher"),
        movie("Se7en", 1995, 8.6, "David Fincher"),
        movie("Toy Story", 1995, 8.3, "John Lasseter").with("for_kids", true),
        movie("The Matrix Reloaded", 2003, 7.2, "Lana Wachowski"),
    ]
}
