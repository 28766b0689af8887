//! SeaORM entity models
//!
//! Database entities for StudyForge

mod generation_lock;

pub use generation_lock::{
    Entity as GenerationLockEntity,
    Model as GenerationLockRow,
    ActiveModel as GenerationLockActiveModel,
    Column as GenerationLockColumn,
    CREATE_TABLE_SQL as GENERATION_LOCKS_DDL,
};
