//! Generation lock entity
//!
//! One row per in-flight study set generation. The primary key on
//! `lock_key` is what makes acquisition insert-if-absent.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "generation_locks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub lock_key: String,

    /// Lowercase 0x address of the holder
    #[sea_orm(column_type = "Text")]
    pub owner: String,

    /// Per-acquisition id; release must present it
    #[sea_orm(column_type = "Text")]
    pub token: String,

    pub created_at: DateTimeWithTimeZone,

    pub expires_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// DDL for the lock table, applied at startup by the Postgres lock store
pub const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS generation_locks (
    lock_key   TEXT PRIMARY KEY,
    owner      TEXT NOT NULL,
    token      TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL
);
ALTER TABLE generation_locks ADD COLUMN IF NOT EXISTS token TEXT NOT NULL DEFAULT '';
CREATE INDEX IF NOT EXISTS generation_locks_expires_at_idx ON generation_locks (expires_at);
"#;
