//! Scalar sub-plans, correlated sub-plans and CTEs.

use super::{catalog, movie, setup};
use litequery::error::{Error, Result};
use litequery::sql::dsl::*;
use litequery::sql::{Query, Record, Source, Store, Table};

use pretty_assertions::assert_eq;
use std::sync::Arc;

/// Runs the plan and returns the sorted titles of the result.
fn titles(store: &Store, query: &Query) -> Result<Vec<String>> {
    let mut titles: Vec<String> = store
        .execute(query)?
        .iter()
        .filter_map(|r: &Record| r.get("title").cloned())
        .map(String::try_from)
        .collect::<Result<_>>()?;
    titles.sort();
    Ok(titles)
}

/// Movies rated above the average of their release year, via a correlated
/// sub-plan.
fn above_year_average(movies: &Arc<Table>) -> Query {
    let year_average = select([avg(col("rating"))])
        .from(Source::from(movies).alias("sub"))
        .r#where(eq(col("released"), outer("movies.released")));
    select([col("title"), col("rating")]).from(movies).r#where(gt(col("rating"), year_average))
}

/// Movies rated above the average of their release year, joined against
/// per-year averages in a CTE.
fn above_year_average_joined(movies: &Arc<Table>) -> Query {
    let by_year = select([col("released").alias("year"), avg(col("rating")).alias("average")])
        .from(movies)
        .group_by([col("released")]);
    Query::new()
        .with("by_year", by_year)
        .select([col("title"), col("rating")])
        .from(movies)
        .inner_join(Source::cte("by_year"), eq(col("movies.released"), col("by_year.year")))
        .r#where(gt(col("movies.rating"), col("by_year.average")))
}

/// Movies rated above the overall average.
fn above_average(movies: &Arc<Table>) -> Query {
    let average = select([avg(col("rating"))]).from(movies);
    select([col("title"), col("rating")]).from(movies).r#where(gt(col("rating"), average))
}

#[test]
fn independent_subquery() -> Result<()> {
    let (store, movies) = setup(catalog())?;
    assert_eq!(
        titles(&store, &above_average(&movies))?,
        vec!["Fight Club", "Lion King", "Se7en", "The Matrix"]
    );
    Ok(())
}

#[test]
fn correlated_subquery() -> Result<()> {
    let (store, movies) = setup(catalog())?;
    let correlated = titles(&store, &above_year_average(&movies))?;
    assert_eq!(correlated, vec!["Fight Club", "Se7en"]);
    assert_eq!(titles(&store, &above_year_average_joined(&movies))?, correlated);
    Ok(())
}

#[test]
fn correlated_matches_independent_when_years_share_the_average() -> Result<()> {
    let (store, movies) = setup(vec![
        movie("a", 2000, 6.0, "x"),
        movie("b", 2000, 8.0, "x"),
        movie("c", 2001, 5.0, "y"),
        movie("d", 2001, 9.0, "y"),
        movie("e", 2002, 7.0, "z"),
    ])?;
    let independent = titles(&store, &above_average(&movies))?;
    assert_eq!(independent, vec!["b", "d"]);
    assert_eq!(titles(&store, &above_year_average(&movies))?, independent);
    assert_eq!(titles(&store, &above_year_average_joined(&movies))?, independent);
    Ok(())
}

#[test]
fn cte_scalar_in_projection_and_filter() -> Result<()> {
    let (store, movies) = setup(catalog())?;
    let average = || select([col("value")]).from(Source::cte("avg_rating"));
    let query = Query::new()
        .with("avg_rating", select([avg(col("rating")).alias("value")]).from(&movies))
        .select([col("title").into(), subquery(average()).alias("average")])
        .from(&movies)
        .r#where(gt(col("rating"), average()));
    let records = store.execute(&query)?;
    assert_eq!(records.len(), 4);
    for record in &records {
        let average = record.get("average").cloned().map(f64::try_from).transpose()?;
        let average = average.expect("average is set");
        assert!((average - 51.5 / 6.0).abs() < 1e-9, "{average}");
    }
    Ok(())
}

#[test]
fn cte_compiles_to_with_prefix() -> Result<()> {
    let (store, movies) = setup(vec![])?;
    let statement = store.compile(&above_year_average_joined(&movies))?;
    assert_eq!(
        statement.sql,
        "WITH by_year AS (SELECT released AS year, AVG(rating) AS average FROM movies \
         GROUP BY released) SELECT movies.title, movies.rating FROM movies \
         INNER JOIN by_year ON movies.released = by_year.year \
         WHERE movies.rating > by_year.average"
    );
    assert!(statement.params.is_empty());
    Ok(())
}

#[test]
fn invalid_sub_plans() -> Result<()> {
    let (store, movies) = setup(vec![])?;

    // Outer references need an enclosing plan.
    let orphan = select([col("title")]).from(&movies).r#where(eq(col("released"), outer("x.year")));
    assert!(matches!(store.execute(&orphan), Err(Error::QueryBuild(_))));

    let unknown = select([col("value")]).from(Source::cte("nowhere"));
    assert!(matches!(store.execute(&unknown), Err(Error::QueryBuild(_))));

    let duplicate = Query::new()
        .with("a", select([col("title")]).from(&movies))
        .with("a", select([col("title")]).from(&movies))
        .from(Source::cte("a"));
    assert!(matches!(store.execute(&duplicate), Err(Error::QueryBuild(_))));

    // A CTE referencing itself nests without end.
    let recursive =
        Query::new().with("a", Query::new().from(Source::cte("a"))).from(Source::cte("a"));
    assert!(matches!(store.execute(&recursive), Err(Error::QueryBuild(_))));
    Ok(())
}
