/// Embedded schema migrations
///
/// Migration files live in `rallypoint-shared/migrations/` as reversible
/// `{version}_{name}.up.sql` / `.down.sql` pairs and are compiled into the
/// binary with `sqlx::migrate!`.
///
/// # Example
///
/// ```no_run
/// use rallypoint_shared::db::pool::{create_pool, DatabaseConfig};
/// use rallypoint_shared::db::migrations::{run_migrations, get_migration_status};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
/// run_migrations(&pool).await?;
///
/// let status = get_migration_status(&pool).await?;
/// assert!(status.is_up_to_date);
/// # Ok(())
/// # }
/// ```

use sqlx::migrate::{MigrateDatabase, Migrator};
use sqlx::postgres::PgPool;
use sqlx::Postgres;
use tracing::{debug, info, warn};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Number of migrations that have been applied
    pub applied_migrations: usize,

    /// Latest applied migration version
    pub latest_version: Option<i64>,

    /// Whether every embedded migration has been applied
    pub is_up_to_date: bool,
}

/// Number of forward migrations compiled into this build
pub fn embedded_migration_count() -> usize {
    MIGRATOR
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .count()
}

/// Runs all pending database migrations
///
/// # Errors
///
/// Returns an error if a migration fails or was modified after being applied
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    info!("Starting database migrations");

    match MIGRATOR.run(pool).await {
        Ok(()) => {
            info!("All database migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            warn!("Migration failed: {}", e);
            Err(e)
        }
    }
}

/// Gets the current migration status
///
/// # Errors
///
/// Returns an error if the migrations table cannot be queried
pub async fn get_migration_status(pool: &PgPool) -> Result<MigrationStatus, sqlx::Error> {
    debug!("Checking migration status");

    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = 'public'
            AND table_name = '_sqlx_migrations'
        )",
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        debug!("Migrations table does not exist yet");
        return Ok(MigrationStatus {
            applied_migrations: 0,
            latest_version: None,
            is_up_to_date: embedded_migration_count() == 0,
        });
    }

    let (count, latest_version): (i64, Option<i64>) = sqlx::query_as(
        "SELECT COUNT(*), MAX(version)
         FROM _sqlx_migrations
         WHERE success = true",
    )
    .fetch_one(pool)
    .await?;

    let applied = count as usize;

    debug!(
        applied_migrations = applied,
        latest_version = ?latest_version,
        "Migration status retrieved"
    );

    Ok(MigrationStatus {
        applied_migrations: applied,
        latest_version,
        is_up_to_date: applied >= embedded_migration_count(),
    })
}

/// Creates the database if it doesn't exist (development and tests)
///
/// # Errors
///
/// Returns an error if the server is unreachable or creation is not permitted
pub async fn ensure_database_exists(database_url: &str) -> Result<(), sqlx::Error> {
    info!("Checking if database exists");

    if !Postgres::database_exists(database_url).await? {
        info!("Database does not exist, creating it");
        Postgres::create_database(database_url).await?;
        info!("Database created successfully");
    } else {
        debug!("Database already exists");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_migrations_present() {
        assert_eq!(embedded_migration_count(), 4);
    }

    #[test]
    fn test_migration_status_clone() {
        let status = MigrationStatus {
            applied_migrations: 4,
            latest_version: Some(20240101000004),
            is_up_to_date: true,
        };

        let cloned = status.clone();
        assert_eq!(status.applied_migrations, cloned.applied_migrations);
        assert_eq!(status.latest_version, cloned.latest_version);
        assert_eq!(status.is_up_to_date, cloned.is_up_to_date);
    }
}
