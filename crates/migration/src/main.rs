use sea_orm_migration::prelude::*;
use std::env;

/// Which database the CLI migrates, picked by `MIGRATION_TARGET` (`tokens` or `users`).
#[derive(Clone, Copy, PartialEq, Eq)]
enum Target {
    Tokens,
    Users,
}

fn target() -> Target {
    match env::var("MIGRATION_TARGET").as_deref() {
        Ok("users") => Target::Users,
        _ => Target::Tokens,
    }
}

/// Database URL from the server's `config.yaml`, honouring the same `__` env overrides.
///
/// The users target falls back to `database_url` when no `users_database_url` is set.
fn configured_database_url(target: Target) -> Option<String> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config.yaml").required(false))
        .add_source(config::Environment::default().separator("__"))
        .build()
        .ok()?;
    let users = (target == Target::Users)
        .then(|| settings.get_string("users_database_url").ok())
        .flatten();
    users.or_else(|| settings.get_string("database_url").ok())
}

#[tokio::main]
async fn main() {
    let target = target();
    if env::var("DATABASE_URL").is_err() {
        match configured_database_url(target) {
            Some(url) => env::set_var("DATABASE_URL", url),
            None => eprintln!("DATABASE_URL is unset and config.yaml has no database URL"),
        }
    }
    match target {
        Target::Tokens => cli::run_cli(migration::Migrator).await,
        Target::Users => cli::run_cli(migration::UsersMigrator).await,
    }
}
