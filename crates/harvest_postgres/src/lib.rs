mod config;
mod params;
mod store;

pub use config::PgConfig;
pub use store::{PostgresSession, PostgresStore};
