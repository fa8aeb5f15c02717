//! litequery runs the movies reports against a SQLite database, and shows
//! the schema and plans involved. It takes configuration via a
//! configuration file or LITEQUERY_* environment variables.

#![warn(clippy::all)]

use litequery::errbuild;
use litequery::error::Result;
use litequery::movies::{self, Report};
use litequery::sql::{Registry, Store, Table};
use litequery::Config;

use clap::Parser as _;
use log::info;
use std::sync::Arc;

fn main() {
    if let Err(error) = Command::parse().run() {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

/// A typed query builder over embedded SQLite.
#[derive(clap::Parser)]
#[command(about, version)]
struct Command {
    /// Configuration file path.
    #[arg(short = 'c', long)]
    config: Option<String>,
    #[command(subcommand)]
    action: Action,
}

#[derive(clap::Subcommand)]
enum Action {
    /// Creates the movies table, unless it exists.
    Init,
    /// Prints the DDL of every table in the database.
    Schema,
    /// Prints the plan and SQL of a report.
    Explain { report: String },
    /// Runs a report. Lists the reports if none is given.
    Report { name: Option<String> },
}

impl Command {
    fn run(self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        let loglevel = config.log_level.parse::<simplelog::LevelFilter>()?;
        let mut logconfig = simplelog::ConfigBuilder::new();
        if loglevel != simplelog::LevelFilter::Debug {
            logconfig.add_filter_allow_str("litequery");
        }
        simplelog::SimpleLogger::init(loglevel, logconfig.build())?;

        let store = Store::from_config(&config)?;
        let registry = Registry::new();
        match self.action {
            Action::Init => {
                if store.table_names()?.iter().any(|name| name == movies::TABLE) {
                    info!("Table {} already exists", movies::TABLE);
                } else {
                    store.create_table(&movies::table()?)?;
                }
            }
            Action::Schema => {
                for table in registry.mirror_all(&store)? {
                    println!("{};", table.as_sql());
                }
            }
            Action::Explain { report } => {
                let movies = Self::movies(&store, &registry)?;
                let query = Report::from_name(&report)?.query(&movies)?;
                println!("{}", query.explain()?);
                println!();
                let statement = store.compile(&query)?;
                println!("{}", statement.sql);
                for (i, param) in statement.params.iter().enumerate() {
                    println!("  ?{} = {param}", i + 1);
                }
            }
            Action::Report { name: None } => {
                for report in Report::all() {
                    println!("{report}");
                }
            }
            Action::Report { name: Some(name) } => {
                let movies = Self::movies(&store, &registry)?;
                let query = Report::from_name(&name)?.query(&movies)?;
                for record in store.execute(&query)? {
                    println!("{record}");
                }
            }
        }
        Ok(())
    }

    /// Mirrors the database's movies table, falling back to the built-in
    /// schema if the database has none.
    fn movies(store: &Store, registry: &Registry) -> Result<Arc<Table>> {
        if store.table_names()?.iter().any(|name| name == movies::TABLE) {
            registry.mirror(store, movies::TABLE)?;
        } else {
            movies::define(registry)?;
        }
        let table = registry.table(movies::TABLE)?;
        if table.column("movie_id").is_none() {
            return errbuild!("table {} has no movie_id column", movies::TABLE);
        }
        Ok(table)
    }
}
