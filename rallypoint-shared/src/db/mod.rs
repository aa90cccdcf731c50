/// Database layer for Rallypoint
///
/// - `pool`: PostgreSQL connection pool sized for open claims
/// - `migrations`: Embedded schema migrations
///
/// Row types and their queries live in the `models` module.
///
/// # Example
///
/// ```no_run
/// use rallypoint_shared::db::pool::{create_pool, DatabaseConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig {
///         url: std::env::var("DATABASE_URL")?,
///         ..Default::default()
///     };
///
///     let pool = create_pool(config).await?;
///     Ok(())
/// }
/// ```

pub mod migrations;
pub mod pool;
