mod error;
mod log;

pub use error::SqlError;
pub use log::SqliteLog;
