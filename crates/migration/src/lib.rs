pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_oauth_token;
mod m20260301_000002_create_user_account;

/// Schema of the token database.
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20260301_000001_create_oauth_token::Migration)]
    }
}

/// Tables this server owns inside the user directory's database.
///
/// Tracked in its own history table so both migrators can share one database.
pub struct UsersMigrator;

#[async_trait::async_trait]
impl MigratorTrait for UsersMigrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20260301_000002_create_user_account::Migration)]
    }

    fn migration_table_name() -> DynIden {
        Alias::new("seaql_migrations_users").into_iden()
    }
}
