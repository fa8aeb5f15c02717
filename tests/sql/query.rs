//! Queries: filters, grouping, ordering, paging and result shaping.

use super::{catalog, setup};
use litequery::error::{Error, Result};
use litequery::sql::dsl::*;
use litequery::sql::{
    Casing, Column, DataType, GroupingMode, Query, Row, Store, Table, Value, Worker,
};
use litequery::Config;

use pretty_assertions::assert_eq;
use serde::Deserialize;
use std::sync::Arc;

/// Generates tests that run a plan against the catalog, and compare the
/// displayed records with the expected ones.
macro_rules! test_query {
    ( $( $name:ident: $query:expr => $expect:expr, )* ) => {
        $(
            #[test]
            fn $name() -> Result<()> {
                let (store, movies) = setup(catalog())?;
                let query: Query = $query(&movies);
                let records: Vec<String> =
                    store.execute(&query)?.iter().map(|r| r.to_string()).collect();
                let expect: &[&str] = &$expect;
                assert_eq!(records, expect);
                Ok(())
            }
        )*
    };
}

test_query! {
    where_like: |movies: &Arc<Table>| select([col("title")])
        .from(movies)
        .r#where(like(col("title"), "The%"))
        .order_by([asc(col("title"))])
        => [r#"title: "The Matrix""#, r#"title: "The Matrix Reloaded""#],

    where_in_set: |movies: &Arc<Table>| select([col("title")])
        .from(movies)
        .r#where(in_set(col("director"), ["Roger Allers", "John Lasseter"]))
        => [r#"title: "Lion King""#, r#"title: "Toy Story""#],

    where_between: |movies: &Arc<Table>| select([col("title"), col("released")])
        .from(movies)
        .r#where(between(col("released"), 1995, 1999))
        .order_by([asc(col("released")), asc(col("title"))])
        => [
            r#"title: "Se7en", released: 1995"#,
            r#"title: "Toy Story", released: 1995"#,
            r#"title: "Fight Club", released: 1999"#,
            r#"title: "The Matrix", released: 1999"#,
        ],

    where_or_within_and: |movies: &Arc<Table>| select([col("title")])
        .from(movies)
        .r#where(
            or(eq(col("director"), "David Fincher"), eq(col("director"), "Roger Allers"))
                .and(lt(col("released"), 1995)),
        )
        => [r#"title: "Lion King""#],

    where_is_null: |movies: &Arc<Table>| select([count_all().alias("n")])
        .from(movies)
        .r#where(is_null(col("overview")))
        => ["n: 6"],

    repeated_where_conjoins: |movies: &Arc<Table>| select([col("title")])
        .from(movies)
        .r#where(eq(col("director"), "Lana Wachowski"))
        .r#where(gt(col("released"), 2000))
        => [r#"title: "The Matrix Reloaded""#],

    arithmetic: |movies: &Arc<Table>| {
        let years = sub(col("released"), 1900).alias("years");
        select([col("title").into(), years])
            .from(movies)
            .r#where(eq(col("director"), "Roger Allers"))
    } => [r#"title: "Lion King", years: 94"#],

    group_count: |movies: &Arc<Table>| select([col("released").into(), count_all().alias("total")])
        .from(movies)
        .group_by([col("released")])
        .order_by([desc(alias("total")), asc(col("released"))])
        => [
            "released: 1995, total: 2",
            "released: 1999, total: 2",
            "released: 1994, total: 1",
            "released: 2003, total: 1",
        ],

    having_alias: |movies: &Arc<Table>| select([col("director").into(), count_all().alias("total")])
        .from(movies)
        .group_by([col("director")])
        .having(gt(alias("total"), 1))
        .order_by([asc(col("director"))])
        => [r#"director: "David Fincher", total: 2"#, r#"director: "Lana Wachowski", total: 2"#],

    having_count_all: |movies: &Arc<Table>| select([
            col("director").into(),
            round(avg(col("rating")), 2).alias("avg_rating"),
        ])
        .from(movies)
        .group_by([col("director")])
        .having(gt(count_all(), 1))
        .order_by([desc(alias("avg_rating"))])
        => [
            r#"director: "David Fincher", avg_rating: 8.7"#,
            r#"director: "Lana Wachowski", avg_rating: 7.95"#,
        ],

    having_on_group_key: |movies: &Arc<Table>| {
        select([col("released").into(), count_all().alias("total")])
            .from(movies)
            .group_by([col("released")])
            .having(gt(col("released"), 1995))
            .order_by([asc(col("released"))])
    } => ["released: 1999, total: 2", "released: 2003, total: 1"],

    having_aggregate_not_projected: |movies: &Arc<Table>| select([col("director")])
        .from(movies)
        .group_by([col("director")])
        .having(gte(min(col("rating")), 8.5))
        .order_by([asc(col("director"))])
        => [r#"director: "David Fincher""#, r#"director: "Roger Allers""#],

    group_max_min: |movies: &Arc<Table>| select([
            col("director").into(),
            max(col("rating")).alias("best"),
            min(col("rating")).alias("worst"),
        ])
        .from(movies)
        .group_by([col("director")])
        .having(gt(count_all(), 1))
        .order_by([desc(alias("best"))])
        => [
            r#"director: "David Fincher", best: 8.8, worst: 8.6"#,
            r#"director: "Lana Wachowski", best: 8.7, worst: 7.2"#,
        ],

    case_buckets: |movies: &Arc<Table>| select([
            col("title").into(),
            case([(gte(col("rating"), 8.7), lit("great")), (gte(col("rating"), 8), lit("good"))])
                .otherwise(lit("fine"))
                .alias("grade"),
        ])
        .from(movies)
        .order_by([asc(col("movie_id"))])
        => [
            r#"title: "The Matrix", grade: "great""#,
            r#"title: "Lion King", grade: "great""#,
            r#"title: "Fight Club", grade: "great""#,
            r#"title: "Se7en", grade: "good""#,
            r#"title: "Toy Story", grade: "good""#,
            r#"title: "The Matrix Reloaded", grade: "fine""#,
        ],

    integer_ratio: |movies: &Arc<Table>| {
        let top = count(case([(gt(col("rating"), 8.5), lit(1))]).end());
        select([int_div(mul(top, 100), count_all()).alias("ratio")]).from(movies)
    } => ["ratio: 66"],

    real_ratio: |movies: &Arc<Table>| {
        let top = count(case([(gt(col("rating"), 8.5), lit(1))]).end());
        select([div(top, count_all()).alias("ratio")]).from(movies)
    } => ["ratio: 0.6666666666666666"],

    page: |movies: &Arc<Table>| select([col("movie_id").alias("id"), col("title").into()])
        .from(movies)
        .order_by([asc(col("movie_id"))])
        .limit(2)
        .offset(2)
        => [r#"id: 3, title: "Fight Club""#, r#"id: 4, title: "Se7en""#],

    offset_without_limit: |movies: &Arc<Table>| select([col("movie_id")])
        .from(movies)
        .order_by([asc(col("movie_id"))])
        .offset(4)
        => ["movie_id: 5", "movie_id: 6"],

    booleans: |movies: &Arc<Table>| select([col("title"), col("for_kids")])
        .from(movies)
        .r#where(eq(col("for_kids"), true))
        => [r#"title: "Toy Story", for_kids: TRUE"#],
}

#[test]
fn top_director_by_revenue() -> Result<()> {
    let store = Store::open_in_memory()?;
    let revenues = Arc::new(Table::new(
        "revenues",
        vec![
            Column::new("director", DataType::Text).not_null(),
            Column::new("revenue", DataType::Integer).not_null(),
        ],
    )?);
    store.create_table(&revenues)?;
    for (director, revenue) in [("A", 100), ("A", 200), ("B", 500), ("C", 50)] {
        store.insert(&revenues, Row::new().with("director", director).with("revenue", revenue))?;
    }

    let query = select([col("director").into(), sum(col("revenue")).alias("total")])
        .from(&revenues)
        .group_by([col("director")])
        .order_by([desc(sum(col("revenue")))])
        .limit(1);
    let records = store.execute(&query)?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("director"), Some(&Value::from("B")));
    assert_eq!(records[0].get("total"), Some(&Value::Integer(500)));
    Ok(())
}

#[test]
fn execute_one_grouped() -> Result<()> {
    let (store, movies) = setup(catalog())?;
    let busiest = select([col("released").into(), count_all().alias("total")])
        .from(&movies)
        .group_by([col("released")])
        .order_by([desc(alias("total")), desc(col("released"))]);
    let record = store.execute_one(&busiest)?.map(|r| r.to_string());
    assert_eq!(record.as_deref(), Some("released: 1999, total: 2"));

    let none = busiest.having(gt(count_all(), 2));
    assert_eq!(store.execute_one(&none)?, None);
    Ok(())
}

#[test]
fn plans_are_deterministic() -> Result<()> {
    let (store, movies) = setup(catalog())?;
    let build = || {
        select([col("director").into(), count_all().alias("total")])
            .from(&movies)
            .r#where(gt(col("rating"), 8))
            .group_by([col("director")])
            .order_by([desc(alias("total")), asc(col("director"))])
    };
    let (a, b) = (build(), build());
    assert_eq!(a, b);
    assert_eq!(a.explain()?, b.explain()?);
    assert_eq!(store.compile(&a)?.sql, store.compile(&b)?.sql);
    assert_eq!(store.execute(&a)?, store.execute(&b)?);

    // Builder calls leave the original plan untouched.
    let limited = a.clone().limit(1);
    assert_ne!(limited, a);
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn explain() -> Result<()> {
    let (_, movies) = setup(vec![])?;
    // Calls in any order yield the same canonical tree.
    let query = select([col("title")])
        .from(&movies)
        .limit(1)
        .order_by([desc(col("rating"))])
        .r#where(gt(col("rating"), 9));
    assert_eq!(
        query.explain()?,
        "Limit: 1
└─ Order: rating desc
   └─ Projection: title
      └─ Filter: rating > 9
         └─ Scan: movies"
    );
    Ok(())
}

#[test]
fn permissive_and_strict_grouping() -> Result<()> {
    let (store, movies) = setup(catalog())?;
    let query = select([col("title").into(), col("released").into(), count_all().alias("n")])
        .from(&movies)
        .group_by([col("released")]);
    assert_eq!(store.execute(&query)?.len(), 4);

    let strict = store.with_grouping(GroupingMode::Strict);
    assert!(matches!(strict.execute(&query), Err(Error::QueryBuild(_))));
    // A plan may override the store's mode.
    let permissive = query.grouping(GroupingMode::Permissive);
    assert_eq!(strict.execute(&permissive)?.len(), 4);
    Ok(())
}

#[test]
fn build_errors() -> Result<()> {
    let (store, movies) = setup(vec![])?;
    let undefined = select([col("title")]).from(&movies).order_by([asc(alias("score"))]);
    assert!(matches!(store.execute(&undefined), Err(Error::QueryBuild(_))));

    let aggregate_filter = select([col("title")]).from(&movies).r#where(gt(count_all(), 1));
    assert!(matches!(store.execute(&aggregate_filter), Err(Error::QueryBuild(_))));

    let sourceless = select([lit(1)]);
    assert!(matches!(store.execute(&sourceless), Err(Error::QueryBuild(_))));
    Ok(())
}

#[test]
fn casing_applies_to_declared_names() -> Result<()> {
    let config = Config { casing: Casing::CamelCase, ..Config::default() };
    let store = Store::from_config(&config)?;
    let movies = super::movies()?;
    store.create_table(&movies)?;
    for row in catalog() {
        store.insert(&movies, row)?;
    }
    let projection =
        [col("for_kids").into(), count_all().alias("total_movies"), count_all().into()];
    let query = select(projection)
        .from(&movies)
        .group_by([col("for_kids")])
        .order_by([asc(col("for_kids"))]);
    let records = store.execute(&query)?;
    let names: Vec<_> = records[0].names().collect();
    assert_eq!(names, vec!["forKids", "totalMovies", "COUNT(*)"]);
    Ok(())
}

#[test]
fn decode_records() -> Result<()> {
    #[derive(Debug, PartialEq, Deserialize)]
    struct Movie {
        title: String,
        rating: f64,
        for_kids: bool,
    }
    let (store, movies) = setup(catalog())?;
    let query = select([col("title"), col("rating"), col("for_kids")])
        .from(&movies)
        .r#where(eq(col("title"), "Toy Story"));
    let record = store.execute_one(&query)?.expect("Toy Story exists");
    assert_eq!(
        record.decode::<Movie>()?,
        Movie { title: "Toy Story".into(), rating: 8.3, for_kids: true }
    );
    Ok(())
}

#[test]
fn configured_timeout() -> Result<()> {
    let config = Config { query_timeout_ms: 100, ..Config::default() };
    let store = Store::from_config(&config)?;
    let movies = super::movies()?;
    store.create_table(&movies)?;
    store.insert(&movies, super::movie("Heat", 1995, 8.3, "Michael Mann"))?;

    let forever = raw(
        "(WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n) SELECT max(i) FROM n)",
        Some(DataType::Integer),
    );
    let error = store.execute(&select([forever]).from(&movies)).expect_err("query times out");
    assert_eq!(error, Error::Timeout);
    assert!(error.is_retryable());

    // The store is usable afterwards.
    assert_eq!(store.execute(&select([col("title")]).from(&movies))?.len(), 1);
    Ok(())
}

#[test]
fn worker_serves_concurrent_callers() -> Result<()> {
    let (store, movies) = setup(vec![])?;
    let worker = Arc::new(Worker::new(store));
    let threads: Vec<_> = (0..4)
        .map(|t| {
            let (worker, movies) = (worker.clone(), movies.clone());
            std::thread::spawn(move || -> Result<()> {
                for i in 0..5 {
                    let movies = movies.clone();
                    let row = super::movie(&format!("Movie {t}.{i}"), 2000 + i, 5.0, "Someone");
                    worker.submit(move |store| store.insert(&movies, row)).wait()?;
                }
                Ok(())
            })
        })
        .collect();
    for thread in threads {
        thread.join().expect("thread panicked")?;
    }
    let count = worker.submit(move |store| store.execute(&select([count_all()]).from(&movies)));
    assert_eq!(count.wait()?[0].get("COUNT(*)"), Some(&Value::Integer(20)));
    Ok(())
}
