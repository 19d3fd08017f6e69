//! Destination store schema definitions using sea-query.

use sea_query::Iden;

/// Destination configuration table.
#[derive(Iden)]
pub enum EventDestinations {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "destination_type"]
    DestinationType,
    #[iden = "options"]
    Options,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// SQL for creating the destination configuration table.
pub const CREATE_EVENT_DESTINATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS event_destinations (
    id TEXT NOT NULL PRIMARY KEY,
    destination_type TEXT NOT NULL,
    options TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
