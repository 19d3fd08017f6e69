//! SQLite destination store.

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use super::schema::{EventDestinations, CREATE_EVENT_DESTINATIONS_TABLE};
use super::{validate_id, DestinationStore, Result};
use crate::destination::DestinationOptions;

/// SQLite implementation of DestinationStore.
///
/// One row per destination; the configuration is stored as JSON so new
/// transport settings need no migration.
pub struct SqliteDestinationStore {
    pool: SqlitePool,
}

impl SqliteDestinationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_EVENT_DESTINATIONS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DestinationStore for SqliteDestinationStore {
    async fn load_all(&self) -> Result<Vec<DestinationOptions>> {
        let query = Query::select()
            .columns([EventDestinations::Id, EventDestinations::Options])
            .from(EventDestinations::Table)
            .order_by(EventDestinations::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut destinations = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let options: String = row.get("options");
            match serde_json::from_str::<DestinationOptions>(&options) {
                Ok(options) => destinations.push(options),
                Err(e) => {
                    warn!(destination = %id, error = %e, "Skipping unreadable destination config")
                }
            }
        }
        Ok(destinations)
    }

    async fn save(&self, options: &DestinationOptions) -> Result<()> {
        validate_id(&options.id)?;
        let json = serde_json::to_string(options)?;
        let updated_at = chrono::Utc::now().to_rfc3339();

        let query = Query::insert()
            .into_table(EventDestinations::Table)
            .columns([
                EventDestinations::Id,
                EventDestinations::DestinationType,
                EventDestinations::Options,
                EventDestinations::UpdatedAt,
            ])
            .values_panic([
                options.id.clone().into(),
                options.type_name().into(),
                json.into(),
                updated_at.into(),
            ])
            .on_conflict(
                OnConflict::column(EventDestinations::Id)
                    .update_columns([
                        EventDestinations::DestinationType,
                        EventDestinations::Options,
                        EventDestinations::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let query = Query::delete()
            .from_table(EventDestinations::Table)
            .and_where(Expr::col(EventDestinations::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
