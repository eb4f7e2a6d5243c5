//! Database module for SQLite persistence.
//!
//! SQLite is the source of truth for materials and analyses.

mod repository;

pub use repository::*;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::models::SEED_MATERIALS;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run embedded migrations
    run_migrations(&pool).await?;
    seed_materials(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL DEFAULT 1,
            revision_id INTEGER NOT NULL DEFAULT 0,
            generated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT OR IGNORE INTO meta (id, schema_version, revision_id, generated_at)
        VALUES (1, 1, 0, datetime('now'));
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS materials (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            friction_stress_mpa REAL NOT NULL,
            locking_parameter REAL NOT NULL,
            description TEXT,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            material_id TEXT NOT NULL,
            material_name TEXT NOT NULL,
            pixels_per_micron REAL NOT NULL,
            image_width INTEGER NOT NULL,
            image_height INTEGER NOT NULL,
            circle_count INTEGER NOT NULL,
            circle_radius_px INTEGER NOT NULL,
            total_intercepts INTEGER NOT NULL,
            total_circumference_px REAL NOT NULL,
            mean_intercept_um REAL NOT NULL,
            grain_diameter_mm REAL NOT NULL,
            astm_grain_number REAL NOT NULL,
            friction_stress_mpa REAL NOT NULL,
            locking_parameter REAL NOT NULL,
            yield_strength_mpa REAL NOT NULL,
            seed INTEGER NOT NULL,
            notes TEXT,
            created_at TEXT NOT NULL,
            overlay_png BLOB
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_materials_name ON materials(name);
        CREATE INDEX IF NOT EXISTS idx_analyses_created_at ON analyses(created_at);
        CREATE INDEX IF NOT EXISTS idx_analyses_material_id ON analyses(material_id);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert the built-in material table. Existing names are left untouched.
async fn seed_materials(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;

    for (name, friction_stress, locking_parameter, description) in SEED_MATERIALS {
        sqlx::query(
            "INSERT OR IGNORE INTO materials (id, name, friction_stress_mpa, locking_parameter, description, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, 1)"
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(*name)
        .bind(*friction_stress)
        .bind(*locking_parameter)
        .bind(*description)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
