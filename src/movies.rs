//! The movies catalog: the schema of the movies dataset, and analytic
//! reports over it expressed as query plans.

use crate::errbuild;
use crate::error::Result;
use crate::sql::dsl::*;
use crate::sql::planner::{Projected, Query, Source};
use crate::sql::schema::{Column, Registry, Table};
use crate::sql::types::DataType;

use std::sync::Arc;

/// The movies table name.
pub const TABLE: &str = "movies";

/// The movies table schema. Release dates are stored as years, and money as
/// whole dollars.
pub fn table() -> Result<Table> {
    Table::new(
        TABLE,
        vec![
            Column::new("movie_id", DataType::Integer).primary_key().autoincrement(),
            Column::new("title", DataType::Text).not_null(),
            Column::new("release_date", DataType::Integer),
            Column::new("overview", DataType::Text),
            Column::new("rating", DataType::Real).check(between(col("rating"), 0, 10)),
            Column::new("director", DataType::Text),
            Column::new("revenue", DataType::Integer),
            Column::new("budget", DataType::Integer),
            Column::new("runtime", DataType::Integer),
            Column::new("genres", DataType::Text),
        ],
    )
}

/// Registers the movies table.
pub fn define(registry: &Registry) -> Result<Arc<Table>> {
    registry.register(table()?)
}

/// Pages through movies by id. Pages are numbered from 1.
pub fn page(movies: &Arc<Table>, number: u64, size: u64) -> Result<Query> {
    // The store's integers are signed.
    let offset = number
        .checked_sub(1)
        .and_then(|skipped| skipped.checked_mul(size))
        .filter(|offset| i64::try_from(*offset).is_ok());
    let offset = match offset {
        Some(offset) => offset,
        None if number == 0 => return errbuild!("pages are numbered from 1"),
        None => return errbuild!("page {number} of size {size} is out of range"),
    };
    Ok(select([col("movie_id").alias("id"), col("title").into()])
        .from(movies)
        .order_by([asc(col("movie_id"))])
        .limit(size)
        .offset(offset))
}

/// An analytic report over the movies table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Report {
    /// Directors by total revenue.
    TopDirectors,
    /// Directors whose total revenue exceeds ten billion.
    BlockbusterDirectors,
    /// Average ratings of directors with more than five movies.
    DirectorRatings,
    /// Ratings graded A, B or C.
    RatingGrades,
    /// Movie counts per runtime bucket.
    RuntimeBuckets,
    /// Movie counts of flops and successes.
    Flops,
    /// The percentage of movies rated above 8.
    TopRatedShare,
    /// The director with the highest total profit.
    MostProfitable,
    /// Average ratings per year in the 21st century.
    YearlyRatings,
    /// Average runtime per decade.
    Decades,
    /// Per-year averages with an arbitrary title of each year. Only valid
    /// with permissive grouping.
    YearSample,
    /// The directors with the most movies.
    ProlificDirectors,
    /// Best and worst ratings of directors with several movies.
    DirectorRatingRange,
    /// The most common rating above 6.
    CommonRating,
    /// Movie counts per release year.
    MoviesPerYear,
    /// Average runtimes of the years after 2010.
    RecentRuntimes,
    /// Directors who never made a movie shorter than two hours.
    LongFormDirectors,
    /// The years with the widest spread between best and worst rating.
    RatingSpread,
    /// The average rating of movies two hours or longer.
    LongMovieRating,
    /// Movie counts per genre list.
    GenreCounts,
    /// Crime movies and thrillers.
    GenreMovies,
    /// Movies rated above the overall average.
    AboveAverage,
    /// Movies earning above the average revenue, via a CTE.
    AboveAverageRevenue,
    /// Movies rated above their year's average, joined against a CTE.
    AboveYearAverage,
    /// Movies rated above their year's average, via a correlated sub-plan.
    AboveYearAverageCorrelated,
    /// The second page of ten movies.
    SecondPage,
}

impl Report {
    /// All reports, in listing order.
    pub fn all() -> &'static [Report] {
        use Report::*;
        &[
            TopDirectors,
            BlockbusterDirectors,
            DirectorRatings,
            RatingGrades,
            RuntimeBuckets,
            Flops,
            TopRatedShare,
            MostProfitable,
            YearlyRatings,
            Decades,
            YearSample,
            ProlificDirectors,
            DirectorRatingRange,
            CommonRating,
            MoviesPerYear,
            RecentRuntimes,
            LongFormDirectors,
            RatingSpread,
            LongMovieRating,
            GenreCounts,
            GenreMovies,
            AboveAverage,
            AboveAverageRevenue,
            AboveYearAverage,
            AboveYearAverageCorrelated,
            SecondPage,
        ]
    }

    /// The report's command-line name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TopDirectors => "top-directors",
            Self::BlockbusterDirectors => "blockbuster-directors",
            Self::DirectorRatings => "director-ratings",
            Self::RatingGrades => "rating-grades",
            Self::RuntimeBuckets => "runtime-buckets",
            Self::Flops => "flops",
            Self::TopRatedShare => "top-rated-share",
            Self::MostProfitable => "most-profitable",
            Self::YearlyRatings => "yearly-ratings",
            Self::Decades => "decades",
            Self::YearSample => "year-sample",
            Self::ProlificDirectors => "prolific-directors",
            Self::DirectorRatingRange => "director-rating-range",
            Self::CommonRating => "common-rating",
            Self::MoviesPerYear => "movies-per-year",
            Self::RecentRuntimes => "recent-runtimes",
            Self::LongFormDirectors => "long-form-directors",
            Self::RatingSpread => "rating-spread",
            Self::LongMovieRating => "long-movie-rating",
            Self::GenreCounts => "genre-counts",
            Self::GenreMovies => "genre-movies",
            Self::AboveAverage => "above-average",
            Self::AboveAverageRevenue => "above-average-revenue",
            Self::AboveYearAverage => "above-year-average",
            Self::AboveYearAverageCorrelated => "above-year-average-correlated",
            Self::SecondPage => "second-page",
        }
    }

    /// Looks up a report by its command-line name.
    pub fn from_name(name: &str) -> Result<Self> {
        match Self::all().iter().find(|report| report.name() == name) {
            Some(report) => Ok(*report),
            None => errbuild!("unknown report {name}"),
        }
    }

    /// Builds the report's plan against the given movies table.
    pub fn query(&self, movies: &Arc<Table>) -> Result<Query> {
        let query = match self {
            Self::TopDirectors => select([col("director").into(), revenue_total()])
                .from(movies)
                .r#where(and(is_not_null(col("revenue")), is_not_null(col("director"))))
                .group_by([col("director")])
                .order_by([desc(alias("total_revenue"))])
                .limit(10),

            Self::BlockbusterDirectors => select([col("director").into(), revenue_total()])
                .from(movies)
                .r#where(is_not_null(col("revenue")))
                .group_by([col("director")])
                .having(gt(alias("total_revenue"), 10_000_000_000i64))
                .order_by([desc(alias("total_revenue"))]),

            Self::DirectorRatings => select([col("director").into(), rating_average()])
                .from(movies)
                .r#where(and(is_not_null(col("director")), is_not_null(col("rating"))))
                .group_by([col("director")])
                .having(gt(count_all(), 5))
                .order_by([desc(alias("avg_rating"))])
                .limit(10),

            Self::RatingGrades => {
                let mark = case([
                    (gt(col("rating"), 8), lit("A")),
                    (gt(col("rating"), 6), lit("B")),
                ])
                .otherwise(lit("C"));
                select([col("rating").into(), mark.alias("mark")]).from(movies).limit(10)
            }

            Self::RuntimeBuckets => {
                let bucket = case([
                    (lt(col("runtime"), 90), lit("Short")),
                    (lt(col("runtime"), 120), lit("Medium")),
                ])
                .otherwise(lit("Long"));
                select([bucket.alias("run_time_category"), count_all().alias("total_movies")])
                    .from(movies)
                    .r#where(is_not_null(col("runtime")))
                    .group_by([alias("run_time_category")])
                    .order_by([asc(alias("run_time_category"))])
            }

            Self::Flops => {
                let outcome = case([(lt(col("revenue"), col("budget")), lit("Flop"))])
                    .otherwise(lit("Success"));
                select([outcome.alias("flop_or_not"), count_all().alias("total_movies")])
                    .from(movies)
                    .r#where(and(is_not_null(col("revenue")), is_not_null(col("budget"))))
                    .group_by([alias("flop_or_not")])
                    .order_by([asc(alias("flop_or_not"))])
            }

            // Integer arithmetic, so the share is truncated to a whole percent.
            Self::TopRatedShare => {
                let top = count(case([(gt(col("rating"), 8), lit(1))]).end());
                select([int_div(mul(top, 100), count_all()).alias("ratio")]).from(movies)
            }

            Self::MostProfitable => {
                let profit = sum(sub(col("revenue"), col("budget")));
                select([col("director").into(), profit.alias("total_profit")])
                    .from(movies)
                    .r#where(
                        is_not_null(col("revenue"))
                            .and(is_not_null(col("budget")))
                            .and(is_not_null(col("director"))),
                    )
                    .group_by([col("director")])
                    .order_by([desc(alias("total_profit"))])
                    .limit(1)
            }

            Self::YearlyRatings => select([col("release_date").into(), rating_average()])
                .from(movies)
                .r#where(and(is_not_null(col("rating")), gt(col("release_date"), 2000)))
                .group_by([col("release_date")])
                .order_by([desc(col("release_date"))]),

            Self::Decades => {
                let decade = mul(int_div(col("release_date"), 10), 10);
                select([decade.alias("decade"), avg(col("runtime")).alias("avg_runtime")])
                    .from(movies)
                    .r#where(and(is_not_null(col("runtime")), is_not_null(col("release_date"))))
                    .group_by([alias("decade")])
                    .order_by([asc(alias("decade"))])
            }

            Self::YearSample => {
                select([col("title").into(), col("release_date").into(), rating_average()])
                    .from(movies)
                    .r#where(and(is_not_null(col("release_date")), is_not_null(col("rating"))))
                    .group_by([col("release_date")])
                    .order_by([desc(col("release_date"))])
                    .limit(10)
            }

            Self::ProlificDirectors => select([col("director").into(), movie_count()])
                .from(movies)
                .r#where(is_not_null(col("director")))
                .group_by([col("director")])
                .order_by([desc(alias("total_movies")), asc(col("director"))])
                .limit(5),

            Self::DirectorRatingRange => select([
                col("director").into(),
                max(col("rating")).alias("max_rating"),
                min(col("rating")).alias("min_rating"),
            ])
            .from(movies)
            .r#where(and(is_not_null(col("director")), is_not_null(col("rating"))))
            .group_by([col("director")])
            .having(gt(count_all(), 1))
            .order_by([desc(alias("max_rating"))])
            .limit(10),

            Self::CommonRating => select([col("rating").into(), movie_count()])
                .from(movies)
                .r#where(gt(col("rating"), 6))
                .group_by([col("rating")])
                .order_by([desc(alias("total_movies"))])
                .limit(1),

            Self::MoviesPerYear => select([col("release_date").into(), movie_count()])
                .from(movies)
                .r#where(is_not_null(col("release_date")))
                .group_by([col("release_date")])
                .order_by([desc(alias("total_movies")), asc(col("release_date"))])
                .limit(10),

            // The filter on the grouping key applies to whole groups.
            Self::RecentRuntimes => {
                select([col("release_date").into(), avg(col("runtime")).alias("avg_runtime")])
                    .from(movies)
                    .r#where(and(is_not_null(col("runtime")), is_not_null(col("release_date"))))
                    .group_by([col("release_date")])
                    .having(gt(col("release_date"), 2010))
                    .order_by([desc(alias("avg_runtime"))])
                    .limit(10)
            }

            Self::LongFormDirectors => select([col("director")])
                .from(movies)
                .group_by([col("director")])
                .having(gte(min(col("runtime")), 120))
                .order_by([asc(col("director"))])
                .limit(10),

            Self::RatingSpread => {
                let spread = sub(max(col("rating")), min(col("rating")));
                select([col("release_date").into(), spread.alias("diff_rating")])
                    .from(movies)
                    .r#where(and(is_not_null(col("rating")), is_not_null(col("release_date"))))
                    .group_by([col("release_date")])
                    .order_by([desc(alias("diff_rating"))])
                    .limit(5)
            }

            Self::LongMovieRating => {
                select([rating_average()]).from(movies).r#where(gte(col("runtime"), 120))
            }

            Self::GenreCounts => {
                select([col("genres").into(), count_all().alias("total_count")])
                    .from(movies)
                    .r#where(is_not_null(col("genres")))
                    .group_by([col("genres")])
                    .order_by([desc(alias("total_count")), asc(col("genres"))])
                    .limit(10)
            }

            Self::GenreMovies => select([col("title"), col("genres")])
                .from(movies)
                .r#where(in_set(col("genres"), ["Crime", "Thriller"]))
                .order_by([asc(col("title"))]),

            Self::AboveAverage => {
                let average = select([avg(col("rating"))]).from(movies);
                select([col("title"), col("rating")])
                    .from(movies)
                    .r#where(gt(col("rating"), average))
            }

            Self::AboveAverageRevenue => {
                let average = || select([col("value")]).from(Source::cte("avg_revenue"));
                Query::new()
                    .with("avg_revenue", select([avg(col("revenue")).alias("value")]).from(movies))
                    .select([
                        col("title").into(),
                        col("director").into(),
                        col("revenue").into(),
                        subquery(average()).alias("average_revenue"),
                    ])
                    .from(movies)
                    .r#where(gt(col("revenue"), average()))
            }

            Self::AboveYearAverage => {
                let by_year = select([
                    col("release_date").alias("year"),
                    avg(col("rating")).alias("avg_rating"),
                ])
                .from(movies)
                .group_by([col("release_date")]);
                Query::new()
                    .with("avg_rating_by_year", by_year)
                    .select([col("title"), col("director"), col("rating"), col("release_date")])
                    .from(movies)
                    .inner_join(
                        Source::cte("avg_rating_by_year"),
                        eq(col("movies.release_date"), col("avg_rating_by_year.year")),
                    )
                    .r#where(gt(col("movies.rating"), col("avg_rating_by_year.avg_rating")))
            }

            Self::AboveYearAverageCorrelated => {
                let year_average = select([avg(col("rating"))])
                    .from(Source::from(movies).alias("sub"))
                    .r#where(eq(col("release_date"), outer("movies.release_date")));
                select([col("title"), col("director"), col("rating"), col("release_date")])
                    .from(movies)
                    .r#where(gt(col("rating"), year_average))
            }

            Self::SecondPage => page(movies, 2, 10)?,
        };
        Ok(query)
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn revenue_total() -> Projected {
    sum(col("revenue")).alias("total_revenue")
}

fn movie_count() -> Projected {
    count_all().alias("total_movies")
}

fn rating_average() -> Projected {
    round(avg(col("rating")), 2).alias("avg_rating")
}
