pub mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::service::LicenseService;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub service: LicenseService,
}

/// Applied to every pooled connection.
const CONNECTION_PRAGMAS: &str = r#"
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
"#;

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
    Pool::builder().max_size(10).build(manager)
}

/// Open a pool and make sure the schema exists.
pub fn open(database_path: &str) -> crate::error::Result<DbPool> {
    let pool = create_pool(database_path)?;
    let conn = pool.get()?;
    init_db(&conn)?;
    Ok(pool)
}
