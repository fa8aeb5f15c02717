//! Inserts, updates and deletes, with constraint validation.

use super::{catalog, movie, setup};
use litequery::error::{ConstraintKind, Error, Result};
use litequery::sql::dsl::*;
use litequery::sql::{Delete, Query, Record, Row, Store, Update, Value};

use pretty_assertions::assert_eq;

#[test]
fn autoincrement_ids() -> Result<()> {
    let (store, movies) = setup(vec![])?;
    let first = store.insert(&movies, movie("The Matrix", 1999, 8.7, "Lana Wachowski"))?;
    let second = store.insert(&movies, movie("The Matrix 2", 2003, 7.2, "Lana Wachowski"))?;
    assert_eq!((first, second), (1, 2));

    // Ids of deleted rows are never reused.
    store.delete(&Delete::new(&movies).r#where(eq(col("movie_id"), 2)))?;
    let third = store.insert(&movies, movie("The Matrix 3", 2003, 6.7, "Lana Wachowski"))?;
    assert_eq!(third, 3);

    let ids = store.execute(&select([col("movie_id")]).from(&movies))?;
    let ids: Vec<_> = ids.iter().filter_map(|r| r.get("movie_id").cloned()).collect();
    assert_eq!(ids, vec![Value::Integer(1), Value::Integer(3)]);
    Ok(())
}

#[test]
fn insert_then_select_by_key() -> Result<()> {
    let (store, movies) = setup(vec![])?;
    let id = store.insert(&movies, movie("Heat", 1995, 8.3, "Michael Mann"))?;
    let record = store.execute_one(&Query::new().from(&movies).r#where(eq(col("movie_id"), id)))?;
    let expect: Record = [
        ("movie_id", Value::Integer(id)),
        ("title", Value::from("Heat")),
        ("released", Value::Integer(1995)),
        ("overview", Value::Null),
        ("rating", Value::Real(8.3)),
        ("director", Value::from("Michael Mann")),
        ("for_kids", Value::Boolean(false)),
    ]
    .into_iter()
    .collect();
    assert_eq!(record, Some(expect));
    Ok(())
}

#[test]
fn missing_required_column_is_rejected_before_the_store() -> Result<()> {
    let (store, movies) = setup(vec![])?;
    let row = Row::new().with("title", "Heat").with("released", 1995).with("rating", 8.3);
    let error = store.insert(&movies, row).expect_err("director is required");
    let violation = error.violation().expect("constraint violation");
    assert_eq!(violation.kind, ConstraintKind::NotNull);
    assert_eq!(violation.column, "movies.director");

    // Nothing reached the store.
    assert_eq!(store.execute(&Query::new().from(&movies))?, vec![]);
    Ok(())
}

#[test]
fn rating_bounds() -> Result<()> {
    let (store, movies) = setup(vec![])?;
    let insert = |title: &str, rating: f64| {
        store.insert(&movies, movie(title, 2000, rating, "Somebody"))
    };
    insert("lowest", 0.0)?;
    insert("highest", 10.0)?;

    for (title, rating) in [("below", -0.001), ("above", 10.001), ("eleven", 11.0)] {
        let error = insert(title, rating).expect_err("rating out of bounds");
        let violation = error.violation().expect("constraint violation");
        assert_eq!(violation.kind, ConstraintKind::Check);
        assert_eq!(violation.detail, "CHECK constraint failed: rating BETWEEN 0 AND 10");
    }
    Ok(())
}

#[test]
fn store_messages_are_verbatim() -> Result<()> {
    let (store, movies) = setup(vec![movie("Heat", 1995, 8.3, "Michael Mann")])?;
    let store = store.with_validation(false);

    let error = store.insert(&movies, movie("Ronin", 1998, 11.0, "John Frankenheimer"));
    assert_eq!(
        error.map_err(|e| e.to_string()),
        Err("CHECK constraint failed: rating BETWEEN 0 AND 10".to_string())
    );

    // Uniqueness is only known to the store, validation or not.
    let Err(Error::Constraint(violation)) =
        store.insert(&movies, movie("Heat", 2020, 5.0, "Someone Else"))
    else {
        panic!("expected a unique violation");
    };
    assert_eq!(violation.kind, ConstraintKind::Unique);
    assert_eq!(violation.column, "movies.title");
    assert_eq!(violation.detail, "UNIQUE constraint failed: movies.title");
    Ok(())
}

#[test]
fn update_rating() -> Result<()> {
    let (store, movies) = setup(vec![
        movie("The Matrix", 1999, 7.0, "Lana Wachowski"),
        movie("Lion King", 1994, 9.9, "Roger Allers"),
    ])?;

    let matrix = || eq(col("title"), "The Matrix");
    let error = store.update(&Update::new(&movies).set("rating", 11.0).r#where(matrix()));
    assert!(matches!(error, Err(Error::Constraint(_))));

    assert_eq!(store.update(&Update::new(&movies).set("rating", 10.0).r#where(matrix()))?, 1);
    let rating = store.execute_one(&select([col("rating")]).from(&movies).r#where(matrix()))?;
    assert_eq!(rating.and_then(|r| r.get("rating").cloned()), Some(Value::Real(10.0)));

    // Other rows are untouched.
    let lion = store.execute_one(
        &select([col("rating")]).from(&movies).r#where(eq(col("title"), "Lion King")),
    )?;
    assert_eq!(lion.and_then(|r| r.get("rating").cloned()), Some(Value::Real(9.9)));
    Ok(())
}

#[test]
fn update_rejects_null_for_required_column() -> Result<()> {
    let (store, movies) = setup(catalog())?;
    let update = Update::new(&movies).set("director", Value::Null);
    let error = store.update(&update).expect_err("director is required");
    assert_eq!(error.violation().map(|v| v.kind), Some(ConstraintKind::NotNull));
    Ok(())
}

#[test]
fn delete_where() -> Result<()> {
    let (store, movies) = setup(catalog())?;
    let fincher = Delete::new(&movies).r#where(eq(col("director"), "David Fincher"));
    let deleted = store.delete(&fincher)?;
    assert_eq!(deleted, 2);
    let remaining = store.execute(&select([count_all().alias("n")]).from(&movies))?;
    assert_eq!(remaining[0].get("n"), Some(&Value::Integer(4)));

    assert_eq!(store.delete(&Delete::new(&movies))?, 4);
    Ok(())
}

#[test]
fn on_disk_store_persists() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("movies.db");
    let movies = super::movies()?;
    {
        let store = Store::open(&path)?;
        store.create_table(&movies)?;
        store.insert(&movies, movie("Heat", 1995, 8.3, "Michael Mann"))?;
    }
    let store = Store::open(&path)?;
    let titles = store.execute(&select([col("title")]).from(&movies))?;
    assert_eq!(titles.len(), 1);
    assert_eq!(titles[0].get("title"), Some(&Value::from("Heat")));
    Ok(())
}
