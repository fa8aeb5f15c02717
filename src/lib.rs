#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

pub mod config;
pub mod error;
pub mod movies;
pub mod sql;

pub use config::Config;
pub use error::{Error, Result};
