//! Schema definition: registering tables, creating them in the store, and
//! mirroring tables that already exist.

use super::{movie, movies};
use litequery::error::{ConstraintKind, Error, Result};
use litequery::sql::dsl::*;
use litequery::sql::schema::registry;
use litequery::sql::{Column, DataType, Registry, Row, Store, Value};

use pretty_assertions::assert_eq;
use serial_test::serial;

/// The movies DDL of an existing database, written by hand.
const EXISTING: &str = "CREATE TABLE movies (
    title TEXT UNIQUE NOT NULL,
    released INTEGER NOT NULL,
    overview TEXT NOT NULL,
    rating REAL NOT NULL,
    director TEXT NOT NULL,
    for_kids INTEGER NOT NULL DEFAULT 0 CHECK(for_kids IN (0, 1))
) STRICT";

#[test]
fn create_and_drop() -> Result<()> {
    let store = Store::open_in_memory()?;
    let movies = movies()?;
    store.create_table(&movies)?;
    assert_eq!(store.table_names()?, vec!["movies"]);
    assert!(store.create_table(&movies).is_err());

    store.drop_table("movies", false)?;
    assert!(store.table_names()?.is_empty());
    store.drop_table("movies", true)?;
    assert!(store.drop_table("movies", false).is_err());
    Ok(())
}

#[test]
fn mirror_existing_table() -> Result<()> {
    let store = Store::open_in_memory()?;
    store.execute_batch(EXISTING)?;
    let registry = Registry::new();
    let movies = registry.mirror(&store, "movies")?;

    assert!(movies.strict);
    let title = movies.column("title").expect("title column");
    assert!(title.unique && !title.nullable);
    let for_kids = movies.column("for_kids").expect("for_kids column");
    assert_eq!(for_kids.datatype, DataType::Boolean);
    assert_eq!(for_kids.default, Some(Value::Boolean(false)));
    assert_eq!(movies.column("rating").map(|c| c.datatype), Some(DataType::Real));
    Ok(())
}

#[test]
fn mirrored_not_null_is_caught_before_the_store() -> Result<()> {
    let store = Store::open_in_memory()?;
    store.execute_batch(EXISTING)?;
    let movies = Registry::new().mirror(&store, "movies")?;

    let row = Row::new()
        .with("title", "The Matrix")
        .with("released", 1999)
        .with("overview", "A computer hacker learns about the true nature of reality.")
        .with("rating", 8.7)
        .with("for_kids", false);
    let Err(Error::Constraint(violation)) = store.insert(&movies, row.clone()) else {
        panic!("expected a constraint violation");
    };
    assert_eq!(violation.kind, ConstraintKind::NotNull);
    assert_eq!(violation.column, "movies.director");
    assert_eq!(violation.detail, "NOT NULL constraint failed: movies.director");

    // The store reports the same violation in its own words.
    let store = store.with_validation(false);
    let error = store.insert(&movies, row).expect_err("store rejects the row");
    assert_eq!(error.to_string(), "NOT NULL constraint failed: movies.director");
    Ok(())
}

#[test]
fn mirrored_boolean_check() -> Result<()> {
    let store = Store::open_in_memory()?;
    store.execute_batch(EXISTING)?;
    let movies = Registry::new().mirror(&store, "movies")?;

    let row = movie("The Matrix", 1999, 8.7, "Lana Wachowski").with("overview", "Neo");
    let row = |for_kids: i64| row.clone().with("for_kids", for_kids);
    let error = store.insert(&movies, row(2)).expect_err("2 isn't a boolean");
    assert_eq!(error.violation().map(|v| v.kind), Some(ConstraintKind::TypeMismatch));
    assert_eq!(error.to_string(), "CHECK constraint failed: for_kids IN (0, 1)");

    let error = store.with_validation(false).insert(&movies, row(2)).expect_err("store check");
    assert_eq!(error.to_string(), "CHECK constraint failed: for_kids IN (0, 1)");
    Ok(())
}

#[test]
fn mirror_all_round_trips_created_tables() -> Result<()> {
    let store = Store::open_in_memory()?;
    let movies = movies()?;
    store.create_table(&movies)?;
    let registry = Registry::new();
    let mirrored = registry.mirror_all(&store)?;
    assert_eq!(mirrored.len(), 1);
    assert_eq!(mirrored[0].columns.len(), movies.columns.len());
    for (mirrored, column) in mirrored[0].columns.iter().zip(&movies.columns) {
        assert_eq!(mirrored.name, column.name);
        assert_eq!(mirrored.datatype, column.datatype);
        assert_eq!(mirrored.nullable, column.nullable);
        assert_eq!(mirrored.default, column.default);
        assert_eq!(mirrored.autoincrement, column.autoincrement);
    }
    Ok(())
}

#[test]
fn mirror_composite_keys_and_loose_types() -> Result<()> {
    let store = Store::open_in_memory()?;
    store.execute_batch(
        "CREATE TABLE credits (
            person_id INTEGER NOT NULL,
            movie_id INTEGER NOT NULL,
            role,
            PRIMARY KEY (movie_id, person_id)
        );
        CREATE TABLE budgets (movie_id INTEGER PRIMARY KEY, amount NUMERIC, poster BLOB);",
    )?;
    let registry = Registry::new();
    let mirrored = registry.mirror_all(&store)?;
    let names: Vec<_> = mirrored.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["budgets", "credits"]);

    let budgets = registry.table("budgets")?;
    assert_eq!(budgets.primary_key().map(|c| c.name.as_str()), Some("movie_id"));
    assert_eq!(budgets.column("amount").map(|c| c.datatype), Some(DataType::Any));
    assert_eq!(budgets.column("poster").map(|c| c.datatype), Some(DataType::Any));

    let credits = registry.table("credits")?;
    assert_eq!(credits.key, vec!["movie_id", "person_id"]);
    assert_eq!(credits.primary_key(), None);
    assert_eq!(credits.column("role").map(|c| c.datatype), Some(DataType::Any));

    // Untyped columns take any value, and the store enforces the key.
    let credit = |role: Value| {
        Row::new().with("movie_id", 1).with("person_id", 2).with("role", role)
    };
    store.insert(&credits, credit(Value::Integer(7)))?;
    let error = store.insert(&credits, credit(Value::from("Director"))).expect_err("duplicate");
    assert_eq!(error.violation().map(|v| v.kind), Some(ConstraintKind::PrimaryKey));
    let records = store.execute(&select([col("role")]).from(&credits))?;
    assert_eq!(records[0].get("role"), Some(&Value::Integer(7)));
    Ok(())
}

#[test]
fn keyword_named_columns() -> Result<()> {
    let store = Store::open_in_memory()?;
    let table = Registry::new().define_table(
        "order",
        vec![
            Column::new("using", DataType::Integer).primary_key(),
            Column::new("escape", DataType::Text).not_null().unique(),
            Column::new("collate", DataType::Real),
        ],
    )?;
    store.create_table(&table)?;
    store.insert(&table, Row::new().with("using", 1).with("escape", "a").with("collate", 1.5))?;
    store.insert(&table, Row::new().with("using", 2).with("escape", "b"))?;

    let query = select([col("escape")])
        .from(&table)
        .r#where(is_null(col("collate")))
        .order_by([desc(col("using"))]);
    let records = store.execute(&query)?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("escape"), Some(&Value::from("b")));

    let mirrored = Registry::new().mirror(&store, "order")?;
    assert_eq!(mirrored.primary_key().map(|c| c.name.as_str()), Some("using"));
    assert!(mirrored.column("escape").is_some_and(|c| c.unique));
    Ok(())
}

#[test]
fn registry_seals_on_first_lookup() -> Result<()> {
    let registry = Registry::new();
    registry.define_table("a", vec![Column::new("id", DataType::Integer).primary_key()])?;
    registry.table("a")?;
    let result = registry.define_table("b", vec![Column::new("id", DataType::Integer)]);
    assert!(matches!(result, Err(Error::SchemaDefinition(_))));
    Ok(())
}

#[test]
#[serial]
fn global_registry_lifecycle() -> Result<()> {
    registry::teardown()?;
    assert!(registry::global().is_err());

    let installed = registry::init()?;
    assert!(registry::init().is_err());
    installed.register((*movies()?).clone())?;
    let movies = registry::global()?.table("movies")?;
    assert_eq!(movies.name, "movies");

    registry::teardown()?;
    assert!(registry::global().is_err());
    Ok(())
}

#[test]
fn invalid_schemas() {
    let duplicate = vec![Column::new("a", DataType::Text), Column::new("a", DataType::Text)];
    let result = Registry::new().define_table("t", duplicate);
    assert!(matches!(result, Err(Error::SchemaDefinition(_))));

    let autoincrement = vec![Column::new("id", DataType::Text).primary_key().autoincrement()];
    assert!(Registry::new().define_table("t", autoincrement).is_err());

    let default = vec![Column::new("n", DataType::Integer).not_null().default(Value::Null)];
    assert!(Registry::new().define_table("t", default).is_err());

    let checked = vec![Column::new("n", DataType::Integer).check(gt(col("n"), 0))];
    assert!(Registry::new().define_table("t", checked).is_ok());
}
