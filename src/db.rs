use crate::error::{Error, Result};
use crate::settings::settings;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection, Pool};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub const DAY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout_ms: u64,
}

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), r2d2::Error> {
        configure_connection(conn, self.busy_timeout_ms).map_err(r2d2::Error::QueryError)
    }
}

pub fn establish_pool(database_url: &str) -> Result<DbPool> {
    let s = settings();
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(s.store.pool_size)
        .connection_customizer(Box::new(ConnectionOptions {
            busy_timeout_ms: s.store.busy_timeout_ms,
        }))
        .build(manager)?;
    Ok(pool)
}

pub fn configure_connection(conn: &mut SqliteConnection, busy_timeout_ms: u64) -> QueryResult<()> {
    conn.batch_execute(&format!("PRAGMA busy_timeout = {busy_timeout_ms};"))?;
    conn.batch_execute("PRAGMA journal_mode = WAL;")?;
    conn.batch_execute("PRAGMA synchronous = NORMAL;")?;
    conn.batch_execute("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

pub fn run_migrations(pool: &DbPool) -> Result<usize> {
    let mut conn = pool.get()?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| Error::TransientStore(format!("migration failed: {e}")))?;
    Ok(applied.len())
}

pub fn format_day(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

pub fn to_datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_default()
}

/// Unix bounds `[start, end)` of a UTC calendar day.
pub fn day_bounds(day: NaiveDate) -> (i64, i64) {
    let start = day.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
    (start, start + 24 * 3600)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::listing::{register_listing, ListingKind, NewListing, Tier};
    use tempfile::TempDir;

    pub fn test_pool() -> (TempDir, DbPool) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("promo.db");
        let pool = establish_pool(path.to_str().unwrap()).unwrap();
        run_migrations(&pool).unwrap();
        (dir, pool)
    }

    pub fn seed_listing(pool: &DbPool, id: &str, tier: Tier) {
        let mut conn = pool.get().unwrap();
        register_listing(
            &mut conn,
            &NewListing {
                id: id.to_string(),
                kind: ListingKind::Server,
                name: format!("listing {id}"),
                owner_id: "owner".to_string(),
                tier,
            },
            Utc::now(),
        )
        .unwrap();
    }
}
