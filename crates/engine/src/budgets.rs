//! The module contains `Budget` — one allocation bucket — and its entity.
//!
//! A bucket is created by a single allocation event and keeps a running
//! remaining balance. Buckets are never deleted: a fully consumed bucket
//! stays behind as history. `created_at` is the FIFO ordering key used by
//! the allocation engine when an expense draws from several buckets.

use chrono::{DateTime, Datelike, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, ResultEngine};

/// A budget bucket.
///
/// Amounts are integer minor units (cents). Invariants, enforced by the
/// mutating methods:
///
/// - `remaining_minor == allocated_minor - spent_minor`
/// - `remaining_minor >= 0`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Stable identifier, generated once and persisted.
    pub id: Uuid,
    pub user_id: String,
    pub allocated_minor: i64,
    pub spent_minor: i64,
    pub remaining_minor: i64,
    /// Period tag, taken from the allocation timestamp.
    pub month: i32,
    pub year: i32,
    /// Company/location tag of the allocation.
    pub company: String,
    pub created_at: DateTime<Utc>,
}

impl Budget {
    pub fn new(
        user_id: String,
        allocated_minor: i64,
        company: String,
        created_at: DateTime<Utc>,
    ) -> ResultEngine<Self> {
        if allocated_minor <= 0 {
            return Err(EngineError::InvalidArgument(
                "allocated_minor must be > 0".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            allocated_minor,
            spent_minor: 0,
            remaining_minor: allocated_minor,
            month: created_at.month() as i32,
            year: created_at.year(),
            company,
            created_at,
        })
    }

    /// Consume up to `need_minor` from this bucket.
    ///
    /// Returns the amount actually taken: `min(need_minor, remaining_minor)`.
    /// The bucket can only ever reach zero, never go negative.
    pub fn consume(&mut self, need_minor: i64) -> i64 {
        let take = need_minor.min(self.remaining_minor);
        if take > 0 {
            self.spent_minor += take;
            self.remaining_minor -= take;
        }
        take
    }

    /// Admin resize: sets a new allocated amount, recomputing the remainder.
    ///
    /// Shrinking below the already spent amount would force
    /// `remaining_minor < 0` and is rejected.
    pub fn resize(&mut self, allocated_minor: i64) -> ResultEngine<()> {
        if allocated_minor <= 0 {
            return Err(EngineError::InvalidArgument(
                "allocated_minor must be > 0".to_string(),
            ));
        }
        if allocated_minor < self.spent_minor {
            return Err(EngineError::InvalidArgument(format!(
                "cannot resize below spent amount ({})",
                self.spent_minor
            )));
        }
        self.allocated_minor = allocated_minor;
        self.remaining_minor = allocated_minor - self.spent_minor;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "budgets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub allocated_minor: i64,
    pub spent_minor: i64,
    pub remaining_minor: i64,
    pub month: i32,
    pub year: i32,
    pub company: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Username",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Users,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Budget> for ActiveModel {
    fn from(budget: &Budget) -> Self {
        Self {
            id: ActiveValue::Set(budget.id.to_string()),
            user_id: ActiveValue::Set(budget.user_id.clone()),
            allocated_minor: ActiveValue::Set(budget.allocated_minor),
            spent_minor: ActiveValue::Set(budget.spent_minor),
            remaining_minor: ActiveValue::Set(budget.remaining_minor),
            month: ActiveValue::Set(budget.month),
            year: ActiveValue::Set(budget.year),
            company: ActiveValue::Set(budget.company.clone()),
            created_at: ActiveValue::Set(budget.created_at),
        }
    }
}

impl TryFrom<Model> for Budget {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&model.id)
                .map_err(|_| EngineError::NotFound("budget".to_string()))?,
            user_id: model.user_id,
            allocated_minor: model.allocated_minor,
            spent_minor: model.spent_minor,
            remaining_minor: model.remaining_minor,
            month: model.month,
            year: model.year,
            company: model.company,
            created_at: model.created_at,
        })
    }
}
