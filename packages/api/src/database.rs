use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};

use crate::entity::{audit_log, prediction, user};

/// Connects to `url` and creates any missing tables.
pub async fn connect(url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(url.to_owned());
    opt.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(5))
        .acquire_timeout(Duration::from_secs(3))
        .sqlx_logging(false);

    // Every pooled connection to an in-memory SQLite database sees its own database.
    if url.starts_with("sqlite") && url.contains(":memory:") {
        opt.max_connections(1);
    }

    let db = Database::connect(opt).await?;
    bootstrap(&db).await?;
    tracing::info!("Connected to {:?} database", db.get_database_backend());
    Ok(db)
}

/// `CREATE TABLE IF NOT EXISTS` for every entity, plus their indexes.
pub async fn bootstrap(db: &DatabaseConnection) -> Result<(), DbErr> {
    create_table(db, prediction::Entity).await?;
    create_table(db, user::Entity).await?;
    create_table(db, audit_log::Entity).await?;
    Ok(())
}

async fn create_table<E>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let table = schema.create_table_from_entity(entity).if_not_exists().to_owned();
    db.execute(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let db = connect("sqlite::memory:").await.unwrap();
        bootstrap(&db).await.unwrap();
        bootstrap(&db).await.unwrap();
        assert!(db.ping().await.is_ok());
    }
}
