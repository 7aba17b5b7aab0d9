//! Users table, including the denormalized per-user aggregate.
//!
//! The aggregate columns (`allocated_minor`, `spent_minor`,
//! `budget_left_minor`, `reimbursed_minor`) are kept in lock-step with the
//! budget and reimbursement ledgers by the engine so dashboards read one row
//! instead of re-aggregating.

use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};

/// Denormalized running totals for one user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub allocated_minor: i64,
    pub spent_minor: i64,
    pub budget_left_minor: i64,
    pub reimbursed_minor: i64,
}

impl Aggregate {
    /// Applies an expense submission: the full amount is spent, the funded
    /// part leaves the budget, the shortfall lands on the liability total.
    pub fn apply_expense(&mut self, amount_minor: i64, from_allocation_minor: i64) {
        self.spent_minor += amount_minor;
        self.reimbursed_minor += amount_minor - from_allocation_minor;
        self.budget_left_minor -= from_allocation_minor;
    }

    /// Applies a budget allocation event.
    pub fn apply_allocation(&mut self, amount_minor: i64) {
        self.allocated_minor += amount_minor;
        self.budget_left_minor += amount_minor;
    }

    /// Applies an admin resize of one bucket by `delta_minor`
    /// (`new allocated − old allocated`).
    pub fn apply_resize(&mut self, delta_minor: i64) {
        self.allocated_minor += delta_minor;
        self.budget_left_minor += delta_minor;
    }

    /// Removes a whole bucket's contribution, used when a bucket is re-owned.
    pub fn remove_bucket(&mut self, allocated_minor: i64, spent_minor: i64) {
        self.allocated_minor -= allocated_minor;
        self.spent_minor -= spent_minor;
        self.budget_left_minor -= allocated_minor - spent_minor;
    }

    /// Adds a whole bucket's contribution, used when a bucket is re-owned.
    pub fn add_bucket(&mut self, allocated_minor: i64, spent_minor: i64) {
        self.allocated_minor += allocated_minor;
        self.spent_minor += spent_minor;
        self.budget_left_minor += allocated_minor - spent_minor;
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub username: String,
    pub password: String,
    pub role: String,
    pub company: String,
    pub two_factor_pending: bool,
    pub two_factor_verified: bool,
    pub allocated_minor: i64,
    pub spent_minor: i64,
    pub budget_left_minor: i64,
    pub reimbursed_minor: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::budgets::Entity")]
    Budgets,
    #[sea_orm(has_many = "super::expenses::Entity")]
    Expenses,
    #[sea_orm(has_many = "super::reimbursements::Entity")]
    Reimbursements,
}

impl Related<super::budgets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Budgets.def()
    }
}

impl Related<super::expenses::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Expenses.def()
    }
}

impl Related<super::reimbursements::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reimbursements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn aggregate(&self) -> Aggregate {
        Aggregate {
            allocated_minor: self.allocated_minor,
            spent_minor: self.spent_minor,
            budget_left_minor: self.budget_left_minor,
            reimbursed_minor: self.reimbursed_minor,
        }
    }
}

/// Builds the update that writes a new aggregate back onto the user row.
pub fn aggregate_update(username: &str, aggregate: Aggregate) -> ActiveModel {
    ActiveModel {
        username: ActiveValue::Set(username.to_string()),
        allocated_minor: ActiveValue::Set(aggregate.allocated_minor),
        spent_minor: ActiveValue::Set(aggregate.spent_minor),
        budget_left_minor: ActiveValue::Set(aggregate.budget_left_minor),
        reimbursed_minor: ActiveValue::Set(aggregate.reimbursed_minor),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expense_moves_all_three_totals() {
        let mut aggregate = Aggregate {
            allocated_minor: 100_000,
            budget_left_minor: 100_000,
            ..Default::default()
        };
        aggregate.apply_expense(120_000, 100_000);

        assert_eq!(aggregate.spent_minor, 120_000);
        assert_eq!(aggregate.reimbursed_minor, 20_000);
        assert_eq!(aggregate.budget_left_minor, 0);
    }

    #[test]
    fn fully_funded_expense_leaves_reimbursed_untouched() {
        let mut aggregate = Aggregate {
            allocated_minor: 100_000,
            budget_left_minor: 100_000,
            ..Default::default()
        };
        aggregate.apply_expense(40_000, 40_000);

        assert_eq!(aggregate.reimbursed_minor, 0);
        assert_eq!(aggregate.budget_left_minor, 60_000);
    }

    #[test]
    fn allocation_raises_both_totals() {
        let mut aggregate = Aggregate::default();
        aggregate.apply_allocation(25_000);

        assert_eq!(aggregate.allocated_minor, 25_000);
        assert_eq!(aggregate.budget_left_minor, 25_000);
    }

    #[test]
    fn reown_moves_bucket_between_aggregates() {
        let mut from = Aggregate {
            allocated_minor: 100_000,
            spent_minor: 30_000,
            budget_left_minor: 70_000,
            ..Default::default()
        };
        let mut to = Aggregate::default();

        from.remove_bucket(100_000, 30_000);
        to.add_bucket(100_000, 30_000);

        assert_eq!(from.allocated_minor, 0);
        assert_eq!(from.budget_left_minor, 0);
        assert_eq!(to.allocated_minor, 100_000);
        assert_eq!(to.spent_minor, 30_000);
        assert_eq!(to.budget_left_minor, 70_000);
    }
}
