//! The module contains the reimbursement liability ledger entry.
//!
//! A user has at most one *open* entry (`is_reimbursed == false`) carrying
//! all spend no budget bucket covered. New allocations offset it, admins
//! settle it by flipping `is_reimbursed`. Settled entries stay behind as
//! history.

use chrono::{DateTime, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, ResultEngine};

/// An entry of the reimbursement ledger.
///
/// `amount_minor` is the outstanding liability and never goes negative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReimbursementEntry {
    pub id: Uuid,
    pub user_id: String,
    pub amount_minor: i64,
    pub is_reimbursed: bool,
    pub reimbursed_at: Option<DateTime<Utc>>,
    /// The expense that last increased this entry, if any.
    pub last_expense_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ReimbursementEntry {
    /// Creates a fresh open entry with zero liability.
    ///
    /// Entries are created lazily by the allocation engine on the first
    /// shortfall, then incremented.
    pub fn open(user_id: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount_minor: 0,
            is_reimbursed: false,
            reimbursed_at: None,
            last_expense_id: None,
            created_at,
        }
    }

    /// Adds unfunded spend from `expense_id` to the liability.
    pub fn add_shortfall(&mut self, shortfall_minor: i64, expense_id: Uuid) -> ResultEngine<()> {
        if shortfall_minor <= 0 {
            return Err(EngineError::InvalidArgument(
                "shortfall_minor must be > 0".to_string(),
            ));
        }
        self.amount_minor += shortfall_minor;
        self.last_expense_id = Some(expense_id);
        Ok(())
    }

    /// Offsets the liability by a newly allocated amount, clamping at zero.
    ///
    /// Returns the new outstanding amount.
    pub fn offset(&mut self, allocation_minor: i64) -> i64 {
        self.amount_minor = (self.amount_minor - allocation_minor).max(0);
        self.amount_minor
    }

    /// `PENDING → PAID`. Marking an already paid entry again is a conflict.
    pub fn mark_paid(&mut self, at: DateTime<Utc>) -> ResultEngine<()> {
        if self.is_reimbursed {
            return Err(EngineError::Conflict(
                "reimbursement already marked as paid".to_string(),
            ));
        }
        self.is_reimbursed = true;
        self.reimbursed_at = Some(at);
        Ok(())
    }

    /// `PAID → PENDING`. Reverting an already pending entry is a no-op.
    pub fn revert(&mut self) {
        self.is_reimbursed = false;
        self.reimbursed_at = None;
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "reimbursements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub amount_minor: i64,
    pub is_reimbursed: bool,
    pub reimbursed_at: Option<DateTimeUtc>,
    pub last_expense_id: Option<String>,
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

impl From<&ReimbursementEntry> for ActiveModel {
    fn from(entry: &ReimbursementEntry) -> Self {
        Self {
            id: ActiveValue::Set(entry.id.to_string()),
            user_id: ActiveValue::Set(entry.user_id.clone()),
            amount_minor: ActiveValue::Set(entry.amount_minor),
            is_reimbursed: ActiveValue::Set(entry.is_reimbursed),
            reimbursed_at: ActiveValue::Set(entry.reimbursed_at),
            last_expense_id: ActiveValue::Set(entry.last_expense_id.map(|id| id.to_string())),
            created_at: ActiveValue::Set(entry.created_at),
        }
    }
}

impl TryFrom<Model> for ReimbursementEntry {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&model.id)
                .map_err(|_| EngineError::NotFound("reimbursement".to_string()))?,
            user_id: model.user_id,
            amount_minor: model.amount_minor,
            is_reimbursed: model.is_reimbursed,
            reimbursed_at: model.reimbursed_at,
            last_expense_id: model
                .last_expense_id
                .and_then(|s| Uuid::parse_str(&s).ok()),
            created_at: model.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn entry() -> ReimbursementEntry {
        ReimbursementEntry::open("mrossi".to_string(), Utc.timestamp_opt(0, 0).unwrap())
    }

    #[test]
    fn open_entry_starts_at_zero() {
        let entry = entry();
        assert_eq!(entry.amount_minor, 0);
        assert!(!entry.is_reimbursed);
        assert!(entry.reimbursed_at.is_none());
        assert!(entry.last_expense_id.is_none());
    }

    #[test]
    fn shortfall_accumulates() {
        let mut entry = entry();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        entry.add_shortfall(40_000, first).unwrap();
        entry.add_shortfall(10_000, second).unwrap();

        assert_eq!(entry.amount_minor, 50_000);
        assert_eq!(entry.last_expense_id, Some(second));
    }

    #[test]
    #[should_panic(expected = "InvalidArgument(\"shortfall_minor must be > 0\")")]
    fn fail_zero_shortfall() {
        entry().add_shortfall(0, Uuid::new_v4()).unwrap();
    }

    #[test]
    fn offset_reduces_liability() {
        let mut entry = entry();
        entry.add_shortfall(40_000, Uuid::new_v4()).unwrap();

        assert_eq!(entry.offset(25_000), 15_000);
        assert_eq!(entry.amount_minor, 15_000);
    }

    #[test]
    fn offset_clamps_at_zero() {
        let mut entry = entry();
        entry.add_shortfall(40_000, Uuid::new_v4()).unwrap();

        assert_eq!(entry.offset(100_000), 0);
        assert_eq!(entry.amount_minor, 0);
    }

    #[test]
    fn mark_paid_sets_timestamp() {
        let mut entry = entry();
        let at = Utc.timestamp_opt(1000, 0).unwrap();
        entry.mark_paid(at).unwrap();

        assert!(entry.is_reimbursed);
        assert_eq!(entry.reimbursed_at, Some(at));
    }

    #[test]
    #[should_panic(expected = "Conflict(\"reimbursement already marked as paid\")")]
    fn fail_mark_paid_twice() {
        let mut entry = entry();
        entry.mark_paid(Utc.timestamp_opt(1000, 0).unwrap()).unwrap();
        entry.mark_paid(Utc.timestamp_opt(2000, 0).unwrap()).unwrap();
    }

    #[test]
    fn revert_clears_timestamp() {
        let mut entry = entry();
        entry.mark_paid(Utc.timestamp_opt(1000, 0).unwrap()).unwrap();
        entry.revert();

        assert!(!entry.is_reimbursed);
        assert!(entry.reimbursed_at.is_none());
    }

    #[test]
    fn revert_pending_is_noop() {
        let mut entry = entry();
        entry.add_shortfall(40_000, Uuid::new_v4()).unwrap();
        entry.revert();

        assert!(!entry.is_reimbursed);
        assert_eq!(entry.amount_minor, 40_000);
    }
}
