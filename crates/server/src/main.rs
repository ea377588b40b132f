use auth_server::{AppResources, Components};
use auth_server::api::{build_router, shutdown_signal, start_webserver};
use auth_server::config::load_config;
use auth_server::connect_with_retry;
use auth_server::tasks::BackgroundTasks;
use migration::{Migrator, MigratorTrait, UsersMigrator};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

fn initialize_tracing() {
    let default_directives = "auth_server=info,sea_orm=info,tower_http=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    initialize_tracing();

    let config = Arc::new(load_config()?);

    let db = Arc::new(connect_with_retry(&config.database_url, CONNECT_TIMEOUT).await?);
    Migrator::up(db.as_ref(), None).await?;

    let users_db = if config.users_database_url() == config.database_url {
        db.clone()
    } else {
        Arc::new(connect_with_retry(config.users_database_url(), CONNECT_TIMEOUT).await?)
    };
    // account links live next to the users they point at
    UsersMigrator::up(users_db.as_ref(), None).await?;
    tracing::info!("database migrations applied");

    let resources = AppResources {
        db: db.clone(),
        users_db: users_db.clone(),
        config: config.clone(),
    };
    let Components {
        oauth,
        tokens,
        states,
    } = resources.components()?;

    let mut tasks = BackgroundTasks::new();
    if config.oauth.token_gc_interval_secs > 0 {
        let tokens = tokens.clone();
        tasks.spawn_interval(
            "token-sweep",
            Duration::from_secs(config.oauth.token_gc_interval_secs),
            move || {
                let tokens = tokens.clone();
                async move { tokens.sweep().await }
            },
        );
    }
    if config.state_store.gc_interval_secs > 0 {
        let states = states.clone();
        tasks.spawn_interval(
            "state-sweep",
            Duration::from_secs(config.state_store.gc_interval_secs),
            move || {
                let states = states.clone();
                async move { states.sweep() }
            },
        );
    }

    drop((tokens, states));

    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let served = start_webserver(
        build_router(oauth),
        &config.listen,
        shutdown_signal(),
        shutdown_timeout,
    )
    .await;

    tasks.shutdown(shutdown_timeout).await;

    drop(resources);
    let handles = if Arc::ptr_eq(&db, &users_db) {
        drop(users_db);
        vec![db]
    } else {
        vec![db, users_db]
    };
    for handle in handles {
        match Arc::try_unwrap(handle) {
            Ok(conn) => conn.close().await?,
            Err(_) => tracing::warn!("database handle still in use at shutdown, leaving it open"),
        }
    }
    tracing::info!("shutdown complete");
    served
}
