mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::notify::Notifier;
use crate::payments::Gateways;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Base URL for redirects (e.g., https://api.example.com)
    pub base_url: String,
    /// ISO 4217 currency code used for every checkout (lowercase)
    pub currency: String,
    /// How long a pending payment session stays payable
    pub session_ttl_secs: i64,
    pub gateways: Gateways,
    pub notifier: Notifier,
}

/// Per-connection settings: WAL so pollers don't block writers, enforced
/// foreign keys, and a busy timeout so concurrent writers queue up.
fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(configure_connection);
    Pool::builder().max_size(10).build(manager)
}
