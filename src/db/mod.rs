mod connection;
mod migrations;
pub mod repositories;

pub use connection::Database;
pub use repositories::StoredBuffer;
