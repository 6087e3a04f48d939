pub mod adapter;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod fingerprint;
pub mod io;
pub mod issue;
pub mod jira;
pub mod model;
pub mod nudge;
pub mod paths;
pub mod resolver;
pub mod runner;
pub mod scope;
pub mod store;
pub mod sync;

pub use error::{DodError, Result};
