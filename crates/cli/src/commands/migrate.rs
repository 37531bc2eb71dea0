use concierge_core::config::{AppConfig, LoadOptions};
use concierge_db::{connect_with_settings, migrations};
use serde_json::json;

use crate::commands::{current_thread_runtime, CommandFailure, CommandResult};

pub fn run() -> CommandResult {
    run_with(LoadOptions::default())
}

pub fn run_with(options: LoadOptions) -> CommandResult {
    match migrate(options) {
        Ok(applied) => CommandResult::success(
            "migrate",
            "applied pending migrations",
            Some(json!({ "applied_migrations": applied })),
        ),
        Err(failure) => CommandResult::failure("migrate", failure),
    }
}

fn migrate(options: LoadOptions) -> Result<i64, CommandFailure> {
    let config = AppConfig::load(options).map_err(|error| {
        CommandFailure::new("config_validation", format!("configuration issue: {error}"), 2)
    })?;
    let runtime = current_thread_runtime()?;

    runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| CommandFailure::new("db_connectivity", error.to_string(), 4))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| CommandFailure::new("migration", error.to_string(), 5))?;

        let applied: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
                .fetch_one(&pool)
                .await
                .map_err(|error| CommandFailure::new("migration", error.to_string(), 5))?;
        pool.close().await;
        Ok(applied.0)
    })
}
