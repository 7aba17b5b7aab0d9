//! The module contains the expense record and its entity.
//!
//! An expense is written once with the funding split computed at decision
//! time, plus the ids of every bucket consulted — including buckets that
//! contributed nothing, since the set of buckets present at decision time is
//! the audit snapshot of the split. The record does not change when the
//! linked ledger entry is later settled.

use chrono::{DateTime, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, ResultEngine, split::FundingSplit};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: Uuid,
    pub user_id: String,
    pub amount_minor: i64,
    pub from_allocation_minor: i64,
    pub from_reimbursement_minor: i64,
    pub department_id: Uuid,
    pub sub_department_id: Option<Uuid>,
    /// Every bucket consulted when the split was computed, in FIFO order.
    pub budget_ids: Vec<Uuid>,
    /// The ledger entry this expense increased, if it had a shortfall.
    pub reimbursement_id: Option<Uuid>,
    pub payment_method: String,
    pub note: Option<String>,
    pub proof_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Expense {
    pub fn new(
        user_id: String,
        amount_minor: i64,
        split: FundingSplit,
        department_id: Uuid,
        sub_department_id: Option<Uuid>,
        budget_ids: Vec<Uuid>,
        payment_method: String,
        note: Option<String>,
        proof_url: Option<String>,
        created_at: DateTime<Utc>,
    ) -> ResultEngine<Self> {
        if amount_minor <= 0 {
            return Err(EngineError::InvalidArgument(
                "amount_minor must be > 0".to_string(),
            ));
        }
        if split.total_minor() != amount_minor {
            return Err(EngineError::InvalidArgument(
                "funding split does not cover the amount".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            amount_minor,
            from_allocation_minor: split.from_allocation_minor,
            from_reimbursement_minor: split.from_reimbursement_minor,
            department_id,
            sub_department_id,
            budget_ids,
            reimbursement_id: None,
            payment_method,
            note,
            proof_url,
            created_at,
        })
    }
}

fn budget_ids_to_json(ids: &[Uuid]) -> String {
    // Vec<String> via serde_json cannot fail to serialize.
    serde_json::to_string(&ids.iter().map(Uuid::to_string).collect::<Vec<_>>())
        .unwrap_or_else(|_| "[]".to_string())
}

fn budget_ids_from_json(raw: &str) -> Vec<Uuid> {
    serde_json::from_str::<Vec<String>>(raw)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| Uuid::parse_str(id).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "expenses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub amount_minor: i64,
    pub from_allocation_minor: i64,
    pub from_reimbursement_minor: i64,
    pub department_id: String,
    pub sub_department_id: Option<String>,
    /// JSON array of bucket ids.
    pub budget_ids: String,
    pub reimbursement_id: Option<String>,
    pub payment_method: String,
    pub note: Option<String>,
    pub proof_url: Option<String>,
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
    #[sea_orm(
        belongs_to = "super::departments::Entity",
        from = "Column::DepartmentId",
        to = "super::departments::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Departments,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl Related<super::departments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Departments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Expense> for ActiveModel {
    fn from(expense: &Expense) -> Self {
        Self {
            id: ActiveValue::Set(expense.id.to_string()),
            user_id: ActiveValue::Set(expense.user_id.clone()),
            amount_minor: ActiveValue::Set(expense.amount_minor),
            from_allocation_minor: ActiveValue::Set(expense.from_allocation_minor),
            from_reimbursement_minor: ActiveValue::Set(expense.from_reimbursement_minor),
            department_id: ActiveValue::Set(expense.department_id.to_string()),
            sub_department_id: ActiveValue::Set(
                expense.sub_department_id.map(|id| id.to_string()),
            ),
            budget_ids: ActiveValue::Set(budget_ids_to_json(&expense.budget_ids)),
            reimbursement_id: ActiveValue::Set(
                expense.reimbursement_id.map(|id| id.to_string()),
            ),
            payment_method: ActiveValue::Set(expense.payment_method.clone()),
            note: ActiveValue::Set(expense.note.clone()),
            proof_url: ActiveValue::Set(expense.proof_url.clone()),
            created_at: ActiveValue::Set(expense.created_at),
        }
    }
}

impl TryFrom<Model> for Expense {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&model.id)
                .map_err(|_| EngineError::NotFound("expense".to_string()))?,
            user_id: model.user_id,
            amount_minor: model.amount_minor,
            from_allocation_minor: model.from_allocation_minor,
            from_reimbursement_minor: model.from_reimbursement_minor,
            department_id: Uuid::parse_str(&model.department_id)
                .map_err(|_| EngineError::NotFound("department".to_string()))?,
            sub_department_id: model
                .sub_department_id
                .and_then(|s| Uuid::parse_str(&s).ok()),
            budget_ids: budget_ids_from_json(&model.budget_ids),
            reimbursement_id: model
                .reimbursement_id
                .and_then(|s| Uuid::parse_str(&s).ok()),
            payment_method: model.payment_method,
            note: model.note,
            proof_url: model.proof_url,
            created_at: model.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn expense(amount: i64, split: FundingSplit) -> ResultEngine<Expense> {
        Expense::new(
            "mrossi".to_string(),
            amount,
            split,
            Uuid::new_v4(),
            None,
            vec![Uuid::new_v4(), Uuid::new_v4()],
            "card".to_string(),
            None,
            None,
            Utc.timestamp_opt(0, 0).unwrap(),
        )
    }

    #[test]
    fn split_must_cover_amount() {
        let expense = expense(
            100_000,
            FundingSplit {
                from_allocation_minor: 60_000,
                from_reimbursement_minor: 40_000,
            },
        )
        .unwrap();

        assert_eq!(
            expense.from_allocation_minor + expense.from_reimbursement_minor,
            expense.amount_minor
        );
        assert_eq!(expense.budget_ids.len(), 2);
    }

    #[test]
    #[should_panic(expected = "InvalidArgument(\"funding split does not cover the amount\")")]
    fn fail_inconsistent_split() {
        expense(
            100_000,
            FundingSplit {
                from_allocation_minor: 10_000,
                from_reimbursement_minor: 40_000,
            },
        )
        .unwrap();
    }

    #[test]
    fn budget_ids_round_trip_through_json() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let raw = budget_ids_to_json(&ids);
        assert_eq!(budget_ids_from_json(&raw), ids);
    }

    #[test]
    fn malformed_budget_ids_column_is_empty_snapshot() {
        assert!(budget_ids_from_json("not json").is_empty());
    }
}
