use migration::Migrator;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, Statement};
use sea_orm_migration::MigratorTrait;
use std::env;
use tokio::sync::Mutex;

// Migrations are not safe to run concurrently against the same database
static SCHEMA_LOCK: Mutex<()> = Mutex::const_new(());

/// Set up test database connection
/// Uses TEST_DATABASE_URL; returns None when it is unset so callers can skip
pub async fn setup_test_db() -> Option<DatabaseConnection> {
    let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
        return None;
    };

    let db = Database::connect(&database_url)
        .await
        .expect("Failed to connect to test DB");

    {
        let _guard = SCHEMA_LOCK.lock().await;
        Migrator::up(&db, None).await.expect("Failed to run migrations");
    }

    Some(db)
}

/// Remove every row a test wrote for `country_code`
pub async fn cleanup_test_db(db: &DatabaseConnection, country_code: &str) -> Result<(), DbErr> {
    for table in ["balancing_reserves", "day_ahead_prices"] {
        db.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &format!("DELETE FROM {} WHERE country_code = $1", table),
            [country_code.into()],
        ))
        .await?;
    }
    Ok(())
}
