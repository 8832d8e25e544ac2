//! Database model types for Diesel ORM.

use diesel::prelude::*;

use super::schema::history;

/// Database row for a historical snapshot (insertable).
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = history)]
pub struct NewHistoryRow {
    pub fetched_at: String,
    pub cache_key: String,
    pub endpoint: String,
    pub payload: Vec<u8>,
}

/// Database row for a historical snapshot (queryable).
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = history)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct HistoryRow {
    pub id: Option<i32>,
    pub fetched_at: String,
    pub cache_key: String,
    pub endpoint: String,
    pub payload: Vec<u8>,
}
