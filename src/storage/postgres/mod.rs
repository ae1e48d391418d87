//! PostgreSQL implementation of notification storage.

mod notifications;

pub use notifications::PostgresStore;
