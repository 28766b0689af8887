//! Postgres lock store
//!
//! Rows live in `generation_locks`; the primary key on `lock_key` turns
//! `INSERT ... ON CONFLICT DO NOTHING` into insert-if-absent. Release
//! filters on the acquisition token as well as key and owner.

use super::{LockRow, LockStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use studyforge_common::db::models::{GenerationLockActiveModel, GenerationLockColumn, GenerationLockEntity};
use studyforge_common::db::DbPool;
use studyforge_common::errors::Result;
use studyforge_common::types::Address;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgLockStore {
    db: DbPool,
}

impl PgLockStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = GenerationLockEntity::delete_many()
            .filter(GenerationLockColumn::ExpiresAt.lt(now.fixed_offset()))
            .exec(self.db.conn())
            .await?;
        Ok(result.rows_affected)
    }

    async fn insert_if_absent(&self, row: &LockRow) -> Result<bool> {
        let active = GenerationLockActiveModel {
            lock_key: Set(row.lock_key.clone()),
            owner: Set(row.owner.as_str().to_string()),
            token: Set(row.token.to_string()),
            created_at: Set(row.created_at.fixed_offset()),
            expires_at: Set(row.expires_at.fixed_offset()),
        };

        let inserted = GenerationLockEntity::insert(active)
            .on_conflict(
                OnConflict::column(GenerationLockColumn::LockKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.db.conn())
            .await?;
        Ok(inserted == 1)
    }

    async fn delete_held(&self, lock_key: &str, owner: &Address, token: &Uuid) -> Result<bool> {
        let result = GenerationLockEntity::delete_many()
            .filter(GenerationLockColumn::LockKey.eq(lock_key))
            .filter(GenerationLockColumn::Owner.eq(owner.as_str()))
            .filter(GenerationLockColumn::Token.eq(token.to_string()))
            .exec(self.db.conn())
            .await?;
        Ok(result.rows_affected > 0)
    }
}
