use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pagination envelope returned by every list endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub page: u64,
    pub limit: u64,
    pub total_items: u64,
    pub total_pages: u64,
}

pub mod budget {
    use super::*;

    /// Request body for allocating new budget to a user.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct AllocateNew {
        pub user_id: String,
        /// Amount in integer cents.
        pub amount_minor: i64,
        pub company: String,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct BudgetView {
        pub id: Uuid,
        pub user_id: String,
        pub allocated_minor: i64,
        pub spent_minor: i64,
        pub remaining_minor: i64,
        pub month: i32,
        pub year: i32,
        pub company: String,
        /// RFC3339 UTC timestamp; also the FIFO consumption order key.
        pub created_at: DateTime<Utc>,
    }

    /// Response of an allocation: the fresh bucket plus the updated open
    /// ledger entry when an outstanding liability was offset.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct AllocationResponse {
        pub budget: BudgetView,
        pub reimbursement_update: Option<super::reimbursement::ReimbursementView>,
    }

    /// Page slice plus the full filtered set.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct BudgetListResponse {
        pub budgets: Vec<BudgetView>,
        pub all_budgets: Vec<BudgetView>,
        pub meta: PageMeta,
    }

    /// Query parameters for the budget list endpoints.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct BudgetListParams {
        pub page: Option<u64>,
        pub limit: Option<u64>,
        pub location: Option<String>,
        pub user_id: Option<String>,
    }

    /// Query parameters for the budget search endpoint.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct BudgetSearchParams {
        pub page: Option<u64>,
        pub limit: Option<u64>,
        pub location: Option<String>,
        pub user_id: Option<String>,
        pub month: Option<i32>,
        pub year: Option<i32>,
        pub company: Option<String>,
        pub min_allocated_minor: Option<i64>,
        pub max_allocated_minor: Option<i64>,
    }

    /// Admin correction: resize and/or re-own a bucket.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct BudgetUpdate {
        pub amount_minor: Option<i64>,
        pub user_id: Option<String>,
    }
}

pub mod expense {
    use super::*;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct ExpenseView {
        pub id: Uuid,
        pub user_id: String,
        pub amount_minor: i64,
        pub from_allocation_minor: i64,
        pub from_reimbursement_minor: i64,
        pub department_id: Uuid,
        pub sub_department_id: Option<Uuid>,
        /// Every bucket consulted when the funding split was computed, in
        /// consumption order.
        pub budget_ids: Vec<Uuid>,
        pub reimbursement_id: Option<Uuid>,
        pub payment_method: String,
        pub note: Option<String>,
        pub proof_url: Option<String>,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ExpenseCreated {
        pub expense: ExpenseView,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ExpenseListResponse {
        pub expenses: Vec<ExpenseView>,
        pub all_expenses: Vec<ExpenseView>,
        pub meta: PageMeta,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct ExpenseListParams {
        pub page: Option<u64>,
        pub limit: Option<u64>,
        pub location: Option<String>,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct ExpenseSearchParams {
        pub page: Option<u64>,
        pub limit: Option<u64>,
        pub user_id: Option<String>,
        pub department_id: Option<Uuid>,
        /// RFC3339 UTC timestamps bounding `created_at`.
        pub from: Option<DateTime<Utc>>,
        pub to: Option<DateTime<Utc>>,
        pub min_amount_minor: Option<i64>,
        pub max_amount_minor: Option<i64>,
    }

    /// Admin correction of an expense's metadata. The amount and funding
    /// split are immutable.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct ExpenseUpdate {
        pub department_id: Option<Uuid>,
        pub sub_department_id: Option<Uuid>,
        pub payment_method: Option<String>,
        pub note: Option<String>,
        pub proof_url: Option<String>,
    }
}

pub mod reimbursement {
    use super::*;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct ReimbursementView {
        pub id: Uuid,
        pub user_id: String,
        /// Outstanding liability in integer cents, never negative.
        pub amount_minor: i64,
        pub is_reimbursed: bool,
        pub reimbursed_at: Option<DateTime<Utc>>,
        pub last_expense_id: Option<Uuid>,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ReimbursementListResponse {
        pub reimbursements: Vec<ReimbursementView>,
        pub all_reimbursements: Vec<ReimbursementView>,
        pub meta: PageMeta,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct ReimbursementListParams {
        pub page: Option<u64>,
        pub limit: Option<u64>,
        pub location: Option<String>,
    }

    /// Request body for the admin settlement transition.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct ReimbursementSet {
        pub is_reimbursed: bool,
    }
}

pub mod user {
    use super::*;

    /// The denormalized dashboard totals for one user.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct UserSummary {
        pub username: String,
        pub allocated_minor: i64,
        pub spent_minor: i64,
        pub budget_left_minor: i64,
        pub reimbursed_minor: i64,
    }
}
