//! Allocation reconciliation engine.
//!
//! The engine keeps three coupled ledgers consistent as expenses are
//! submitted and budget is allocated: per-user budget buckets, the
//! reimbursement liability ledger and the expense records, plus the
//! denormalized per-user aggregate dashboards read from.
//!
//! Every multi-step operation is a sequence of independent reads and writes
//! against shared rows — there is deliberately no cross-record transaction
//! boundary, so partial failure leaves the already committed steps in place
//! (callers resubmit; see the notes on the individual operations).

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use sea_orm::{
    ActiveValue, DatabaseConnection, JoinType, QueryFilter, QueryOrder, QuerySelect, prelude::*,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

pub use budgets::Budget;
pub use cache::{Cache, MemoryCache};
pub use context::{ROLE_ADMIN, ROLE_EMPLOYEE, RequestContext};
pub use error::EngineError;
pub use expenses::Expense;
pub use files::{FileStorePort, LocalFileStore};
pub use money::MoneyCents;
pub use notify::{EventKind, LoggingDispatcher, NotificationPort};
pub use reimbursements::ReimbursementEntry;
pub use split::{BucketDraw, FundingSplit};
pub use users::Aggregate;

mod budgets;
mod cache;
mod context;
mod departments;
mod error;
mod expenses;
mod files;
mod money;
mod notify;
mod reimbursements;
mod split;
mod sub_departments;
mod users;

type ResultEngine<T> = Result<T, EngineError>;

/// Input for [`Engine::submit_expense`].
#[derive(Clone, Debug)]
pub struct ExpenseCmd {
    pub user_id: String,
    pub amount_minor: i64,
    pub department_id: Uuid,
    pub sub_department_id: Option<Uuid>,
    pub payment_method: String,
    pub note: Option<String>,
    pub proof_url: Option<String>,
}

/// Input for [`Engine::allocate_budget`].
#[derive(Clone, Debug)]
pub struct AllocationCmd {
    pub user_id: String,
    pub amount_minor: i64,
    pub company: String,
}

/// Admin correction of one budget bucket: resize and/or re-own.
#[derive(Clone, Debug, Default)]
pub struct BudgetPatch {
    pub amount_minor: Option<i64>,
    pub user_id: Option<String>,
}

/// Admin correction of an expense's metadata.
///
/// The amount and the funding split are not part of the patch: they were
/// computed against ledger state at submission time and must keep summing
/// to the recorded amount.
#[derive(Clone, Debug, Default)]
pub struct ExpensePatch {
    pub department_id: Option<Uuid>,
    pub sub_department_id: Option<Uuid>,
    pub payment_method: Option<String>,
    pub note: Option<String>,
    pub proof_url: Option<String>,
}

/// Optional filters for the budget search endpoint.
///
/// Serialized as the cache key of the search result, so the field set is
/// part of the cache contract.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BudgetFilter {
    pub user_id: Option<String>,
    pub month: Option<i32>,
    pub year: Option<i32>,
    pub company: Option<String>,
    pub min_allocated_minor: Option<i64>,
    pub max_allocated_minor: Option<i64>,
}

/// Optional filters for the expense search endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExpenseFilter {
    pub user_id: Option<String>,
    pub department_id: Option<Uuid>,
    pub from: Option<DateTimeUtc>,
    pub to: Option<DateTimeUtc>,
    pub min_amount_minor: Option<i64>,
    pub max_amount_minor: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub page: u64,
    pub limit: u64,
    pub total_items: u64,
    pub total_pages: u64,
}

/// A page slice plus the full filtered set, the response shape of every
/// list endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub all: Vec<T>,
    pub meta: PageMeta,
}

fn paginate<T: Clone>(all: Vec<T>, page: u64, limit: u64) -> Paged<T> {
    let page = page.max(1);
    let limit = limit.clamp(1, 100);
    let total_items = all.len() as u64;
    let total_pages = total_items.div_ceil(limit);
    let items = all
        .iter()
        .skip(((page - 1) * limit) as usize)
        .take(limit as usize)
        .cloned()
        .collect();

    Paged {
        items,
        all,
        meta: PageMeta {
            page,
            limit,
            total_items,
            total_pages,
        },
    }
}

pub struct Engine {
    database: DatabaseConnection,
    cache: Arc<dyn Cache>,
    dispatcher: Arc<dyn NotificationPort>,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    async fn user(&self, username: &str) -> ResultEngine<users::Model> {
        users::Entity::find_by_id(username.to_string())
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {username}")))
    }

    /// Two-step catalog resolution: department first, then the
    /// sub-department, which must belong to it.
    async fn resolve_department(
        &self,
        department_id: Uuid,
        sub_department_id: Option<Uuid>,
    ) -> ResultEngine<(String, Option<String>)> {
        let department = departments::Entity::find_by_id(department_id.to_string())
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::NotFound("department".to_string()))?;

        let sub_name = match sub_department_id {
            Some(id) => {
                let sub = sub_departments::Entity::find_by_id(id.to_string())
                    .one(&self.database)
                    .await?
                    .ok_or_else(|| EngineError::NotFound("sub-department".to_string()))?;
                if sub.department_id != department.id {
                    return Err(EngineError::InvalidArgument(
                        "sub-department does not belong to the department".to_string(),
                    ));
                }
                Some(sub.name)
            }
            None => None,
        };

        Ok((department.name, sub_name))
    }

    async fn buckets_oldest_first(&self, user_id: &str) -> ResultEngine<Vec<Budget>> {
        budgets::Entity::find()
            .filter(budgets::Column::UserId.eq(user_id))
            .order_by_asc(budgets::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Budget::try_from)
            .collect()
    }

    async fn open_entry(&self, user_id: &str) -> ResultEngine<Option<ReimbursementEntry>> {
        reimbursements::Entity::find()
            .filter(reimbursements::Column::UserId.eq(user_id))
            .filter(reimbursements::Column::IsReimbursed.eq(false))
            .one(&self.database)
            .await?
            .map(ReimbursementEntry::try_from)
            .transpose()
    }

    fn cache_read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cache
            .get(key)
            .and_then(|raw| serde_json::from_str(&raw).ok())
    }

    fn cache_write<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(payload) => self.cache.set(key, payload, ttl),
            Err(err) => tracing::warn!("failed to serialize cache payload: {err}"),
        }
    }

    /// Creates an expense.
    ///
    /// Computes the funding split against the submitter's buckets, carries
    /// any shortfall on the reimbursement ledger, consumes buckets
    /// oldest-first and keeps the user aggregate in lock-step. Cache
    /// invalidation and the notification run after the core writes and are
    /// best-effort.
    ///
    /// Two concurrent submissions for the same user can read the same
    /// remaining balance and over-consume: there is no per-user lock here,
    /// callers needing strict serialization must provide it upstream.
    pub async fn submit_expense(&self, cmd: ExpenseCmd) -> ResultEngine<Expense> {
        let user = self.user(&cmd.user_id).await?;
        let (department_name, _) = self
            .resolve_department(cmd.department_id, cmd.sub_department_id)
            .await?;

        // Every bucket the user owns, regardless of period tag.
        let mut buckets = self.buckets_oldest_first(&cmd.user_id).await?;
        let available: i64 = buckets.iter().map(|bucket| bucket.remaining_minor).sum();
        let split = split::compute_split(cmd.amount_minor, available)?;

        // The buckets present at decision time, contributing or not, are the
        // audit snapshot of the split.
        let consulted: Vec<Uuid> = buckets.iter().map(|bucket| bucket.id).collect();
        let mut expense = Expense::new(
            cmd.user_id.clone(),
            cmd.amount_minor,
            split,
            cmd.department_id,
            cmd.sub_department_id,
            consulted,
            cmd.payment_method,
            cmd.note,
            cmd.proof_url,
            Utc::now(),
        )?;

        if split.from_reimbursement_minor > 0 {
            let mut entry = match self.open_entry(&cmd.user_id).await? {
                Some(entry) => entry,
                None => {
                    let entry = ReimbursementEntry::open(cmd.user_id.clone(), Utc::now());
                    reimbursements::ActiveModel::from(&entry)
                        .insert(&self.database)
                        .await?;
                    entry
                }
            };
            entry.add_shortfall(split.from_reimbursement_minor, expense.id)?;
            reimbursements::ActiveModel {
                id: ActiveValue::Set(entry.id.to_string()),
                amount_minor: ActiveValue::Set(entry.amount_minor),
                last_expense_id: ActiveValue::Set(
                    entry.last_expense_id.map(|id| id.to_string()),
                ),
                ..Default::default()
            }
            .update(&self.database)
            .await?;
            expense.reimbursement_id = Some(entry.id);
        }

        if split.from_allocation_minor > 0 {
            let draws = split::plan_consumption(&mut buckets, split.from_allocation_minor);
            for draw in &draws {
                let Some(bucket) = buckets.iter().find(|b| b.id == draw.budget_id) else {
                    continue;
                };
                budgets::ActiveModel {
                    id: ActiveValue::Set(bucket.id.to_string()),
                    spent_minor: ActiveValue::Set(bucket.spent_minor),
                    remaining_minor: ActiveValue::Set(bucket.remaining_minor),
                    ..Default::default()
                }
                .update(&self.database)
                .await?;
            }
        }

        expenses::ActiveModel::from(&expense)
            .insert(&self.database)
            .await?;

        let mut aggregate = user.aggregate();
        aggregate.apply_expense(cmd.amount_minor, split.from_allocation_minor);
        users::aggregate_update(&cmd.user_id, aggregate)
            .update(&self.database)
            .await?;

        cache::invalidate_user_views(self.cache.as_ref(), &cmd.user_id);

        let message = format!(
            "Expense of {} registered for {department_name}",
            MoneyCents::new(cmd.amount_minor)
        );
        if !self
            .dispatcher
            .notify(&cmd.user_id, &message, EventKind::ExpenseCreated)
        {
            tracing::warn!(user_id = %cmd.user_id, "expense notification not delivered");
        }

        Ok(expense)
    }

    /// Allocates new budget to a user.
    ///
    /// Returns the fresh bucket and, when an open liability was offset, the
    /// updated ledger entry.
    pub async fn allocate_budget(
        &self,
        cmd: AllocationCmd,
    ) -> ResultEngine<(Budget, Option<ReimbursementEntry>)> {
        if cmd.amount_minor <= 0 {
            return Err(EngineError::InvalidArgument(
                "amount_minor must be > 0".to_string(),
            ));
        }
        let user = self.user(&cmd.user_id).await?;

        // The offset shrinks the liability while the bucket below is still
        // granted in full for the same event; the two debits are
        // independent and must not be netted (see DESIGN.md).
        let reimbursement_update = match self.open_entry(&cmd.user_id).await? {
            Some(mut entry) if entry.amount_minor > 0 => {
                entry.offset(cmd.amount_minor);
                reimbursements::ActiveModel {
                    id: ActiveValue::Set(entry.id.to_string()),
                    amount_minor: ActiveValue::Set(entry.amount_minor),
                    ..Default::default()
                }
                .update(&self.database)
                .await?;
                Some(entry)
            }
            _ => None,
        };

        let budget = Budget::new(
            cmd.user_id.clone(),
            cmd.amount_minor,
            cmd.company,
            Utc::now(),
        )?;
        budgets::ActiveModel::from(&budget)
            .insert(&self.database)
            .await?;

        let mut aggregate = user.aggregate();
        aggregate.apply_allocation(cmd.amount_minor);
        users::aggregate_update(&cmd.user_id, aggregate)
            .update(&self.database)
            .await?;

        cache::invalidate_user_views(self.cache.as_ref(), &cmd.user_id);

        Ok((budget, reimbursement_update))
    }

    /// Flips a ledger entry between `PENDING` and `PAID`.
    ///
    /// A pure settlement flag: buckets, expenses and aggregates are
    /// untouched. Marking an already paid entry paid again is a conflict;
    /// reverting an already pending entry is a no-op success.
    pub async fn set_reimbursed(
        &self,
        entry_id: Uuid,
        paid: bool,
    ) -> ResultEngine<ReimbursementEntry> {
        let model = reimbursements::Entity::find_by_id(entry_id.to_string())
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::NotFound("reimbursement".to_string()))?;
        let mut entry = ReimbursementEntry::try_from(model)?;

        let event = if paid {
            entry.mark_paid(Utc::now())?;
            EventKind::ReimbursementApproved
        } else {
            entry.revert();
            EventKind::ReimbursementReverted
        };

        reimbursements::ActiveModel {
            id: ActiveValue::Set(entry.id.to_string()),
            is_reimbursed: ActiveValue::Set(entry.is_reimbursed),
            reimbursed_at: ActiveValue::Set(entry.reimbursed_at),
            ..Default::default()
        }
        .update(&self.database)
        .await?;

        cache::invalidate_user_views(self.cache.as_ref(), &entry.user_id);

        let message = match event {
            EventKind::ReimbursementApproved => format!(
                "Reimbursement of {} approved",
                MoneyCents::new(entry.amount_minor)
            ),
            _ => "Reimbursement approval reverted".to_string(),
        };
        if !self.dispatcher.notify(&entry.user_id, &message, event) {
            tracing::warn!(user_id = %entry.user_id, "reimbursement notification not delivered");
        }

        Ok(entry)
    }

    /// Admin correction of one bucket: resize and/or re-own.
    ///
    /// Aggregates follow the bucket: a resize adjusts the owner's totals by
    /// the delta, a re-own moves the bucket's whole contribution between
    /// the two owners.
    pub async fn update_budget(
        &self,
        budget_id: Uuid,
        patch: BudgetPatch,
    ) -> ResultEngine<Budget> {
        let model = budgets::Entity::find_by_id(budget_id.to_string())
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::NotFound("budget".to_string()))?;
        let mut budget = Budget::try_from(model)?;

        let old_owner = budget.user_id.clone();
        let old_allocated = budget.allocated_minor;
        let old_spent = budget.spent_minor;

        if let Some(amount) = patch.amount_minor {
            budget.resize(amount)?;
        }

        match patch.user_id {
            Some(new_owner) if new_owner != old_owner => {
                let from = self.user(&old_owner).await?;
                let to = self.user(&new_owner).await?;

                let mut from_aggregate = from.aggregate();
                from_aggregate.remove_bucket(old_allocated, old_spent);
                users::aggregate_update(&old_owner, from_aggregate)
                    .update(&self.database)
                    .await?;

                let mut to_aggregate = to.aggregate();
                to_aggregate.add_bucket(budget.allocated_minor, budget.spent_minor);
                users::aggregate_update(&new_owner, to_aggregate)
                    .update(&self.database)
                    .await?;

                budget.user_id = new_owner;
            }
            _ => {
                let delta = budget.allocated_minor - old_allocated;
                if delta != 0 {
                    let owner = self.user(&old_owner).await?;
                    let mut aggregate = owner.aggregate();
                    aggregate.apply_resize(delta);
                    users::aggregate_update(&old_owner, aggregate)
                        .update(&self.database)
                        .await?;
                }
            }
        }

        budgets::ActiveModel {
            id: ActiveValue::Set(budget.id.to_string()),
            user_id: ActiveValue::Set(budget.user_id.clone()),
            allocated_minor: ActiveValue::Set(budget.allocated_minor),
            spent_minor: ActiveValue::Set(budget.spent_minor),
            remaining_minor: ActiveValue::Set(budget.remaining_minor),
            ..Default::default()
        }
        .update(&self.database)
        .await?;

        cache::invalidate_user_views(self.cache.as_ref(), &old_owner);
        if budget.user_id != old_owner {
            cache::invalidate_user_views(self.cache.as_ref(), &budget.user_id);
        }

        Ok(budget)
    }

    /// Admin correction of an expense's metadata fields.
    pub async fn update_expense(
        &self,
        expense_id: Uuid,
        patch: ExpensePatch,
    ) -> ResultEngine<Expense> {
        let model = expenses::Entity::find_by_id(expense_id.to_string())
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::NotFound("expense".to_string()))?;
        let mut expense = Expense::try_from(model)?;

        if let Some(department_id) = patch.department_id {
            self.resolve_department(department_id, None).await?;
            expense.department_id = department_id;
        }
        if let Some(sub_department_id) = patch.sub_department_id {
            self.resolve_department(expense.department_id, Some(sub_department_id))
                .await?;
            expense.sub_department_id = Some(sub_department_id);
        }
        if let Some(payment_method) = patch.payment_method {
            expense.payment_method = payment_method;
        }
        if let Some(note) = patch.note {
            expense.note = Some(note);
        }
        if let Some(proof_url) = patch.proof_url {
            expense.proof_url = Some(proof_url);
        }

        expenses::ActiveModel {
            id: ActiveValue::Set(expense.id.to_string()),
            department_id: ActiveValue::Set(expense.department_id.to_string()),
            sub_department_id: ActiveValue::Set(
                expense.sub_department_id.map(|id| id.to_string()),
            ),
            payment_method: ActiveValue::Set(expense.payment_method.clone()),
            note: ActiveValue::Set(expense.note.clone()),
            proof_url: ActiveValue::Set(expense.proof_url.clone()),
            ..Default::default()
        }
        .update(&self.database)
        .await?;

        cache::invalidate_user_views(self.cache.as_ref(), &expense.user_id);

        Ok(expense)
    }

    /// The denormalized dashboard totals, straight off the user row.
    pub async fn user_summary(&self, username: &str) -> ResultEngine<Aggregate> {
        Ok(self.user(username).await?.aggregate())
    }

    /// Lists budget buckets, newest first, optionally scoped to a user
    /// and/or a company location. Served from the read cache when fresh.
    pub async fn list_budgets(
        &self,
        location: Option<&str>,
        user_id: Option<&str>,
        page: u64,
        limit: u64,
    ) -> ResultEngine<Paged<Budget>> {
        let scope_location = location.unwrap_or("all");
        let key = match user_id {
            Some(user) => cache::keys::budgets_user(user, scope_location, page, limit),
            None => cache::keys::budgets_all(scope_location, page, limit),
        };
        if let Some(hit) = self.cache_read(&key) {
            return Ok(hit);
        }

        let mut query = budgets::Entity::find().order_by_desc(budgets::Column::CreatedAt);
        if let Some(user) = user_id {
            query = query.filter(budgets::Column::UserId.eq(user));
        }
        if let Some(location) = location {
            query = query.filter(budgets::Column::Company.eq(location));
        }

        let all = query
            .all(&self.database)
            .await?
            .into_iter()
            .map(Budget::try_from)
            .collect::<ResultEngine<Vec<_>>>()?;

        let paged = paginate(all, page, limit);
        self.cache_write(&key, &paged, cache::BUDGET_LIST_TTL);
        Ok(paged)
    }

    /// Budget search; the serialized filter set is the cache key, so stale
    /// results last at most one TTL window.
    pub async fn search_budgets(
        &self,
        filter: &BudgetFilter,
        location: Option<&str>,
        page: u64,
        limit: u64,
    ) -> ResultEngine<Paged<Budget>> {
        let filter_json = serde_json::to_string(filter)
            .map_err(|err| EngineError::InvalidArgument(format!("invalid filter: {err}")))?;
        let key =
            cache::keys::budgets_search(location.unwrap_or("all"), page, limit, &filter_json);
        if let Some(hit) = self.cache_read(&key) {
            return Ok(hit);
        }

        let mut query = budgets::Entity::find().order_by_desc(budgets::Column::CreatedAt);
        if let Some(location) = location {
            query = query.filter(budgets::Column::Company.eq(location));
        }
        if let Some(user) = &filter.user_id {
            query = query.filter(budgets::Column::UserId.eq(user));
        }
        if let Some(month) = filter.month {
            query = query.filter(budgets::Column::Month.eq(month));
        }
        if let Some(year) = filter.year {
            query = query.filter(budgets::Column::Year.eq(year));
        }
        if let Some(company) = &filter.company {
            query = query.filter(budgets::Column::Company.eq(company));
        }
        if let Some(min) = filter.min_allocated_minor {
            query = query.filter(budgets::Column::AllocatedMinor.gte(min));
        }
        if let Some(max) = filter.max_allocated_minor {
            query = query.filter(budgets::Column::AllocatedMinor.lte(max));
        }

        let all = query
            .all(&self.database)
            .await?
            .into_iter()
            .map(Budget::try_from)
            .collect::<ResultEngine<Vec<_>>>()?;

        let paged = paginate(all, page, limit);
        self.cache_write(&key, &paged, cache::SEARCH_TTL);
        Ok(paged)
    }

    /// Lists expenses, newest first. Location filtering goes through the
    /// owning user's company.
    pub async fn list_expenses(
        &self,
        location: Option<&str>,
        user_id: Option<&str>,
        page: u64,
        limit: u64,
    ) -> ResultEngine<Paged<Expense>> {
        let scope_location = location.unwrap_or("all");
        let key = match user_id {
            Some(user) => cache::keys::expenses_user(user, scope_location, page, limit),
            None => cache::keys::expenses_all(scope_location, page, limit),
        };
        if let Some(hit) = self.cache_read(&key) {
            return Ok(hit);
        }

        let mut query = expenses::Entity::find().order_by_desc(expenses::Column::CreatedAt);
        if let Some(user) = user_id {
            query = query.filter(expenses::Column::UserId.eq(user));
        }
        if let Some(location) = location {
            query = query
                .join(JoinType::InnerJoin, expenses::Relation::Users.def())
                .filter(users::Column::Company.eq(location));
        }

        let all = query
            .all(&self.database)
            .await?
            .into_iter()
            .map(Expense::try_from)
            .collect::<ResultEngine<Vec<_>>>()?;

        let paged = paginate(all, page, limit);
        self.cache_write(&key, &paged, cache::EXPENSE_LIST_TTL);
        Ok(paged)
    }

    /// Expense search; cache keyed by the serialized filter set.
    pub async fn search_expenses(
        &self,
        filter: &ExpenseFilter,
        page: u64,
        limit: u64,
    ) -> ResultEngine<Paged<Expense>> {
        let filter_json = serde_json::to_string(filter)
            .map_err(|err| EngineError::InvalidArgument(format!("invalid filter: {err}")))?;
        let key = cache::keys::expenses_search(page, limit, &filter_json);
        if let Some(hit) = self.cache_read(&key) {
            return Ok(hit);
        }

        let mut query = expenses::Entity::find().order_by_desc(expenses::Column::CreatedAt);
        if let Some(user) = &filter.user_id {
            query = query.filter(expenses::Column::UserId.eq(user));
        }
        if let Some(department_id) = filter.department_id {
            query = query.filter(expenses::Column::DepartmentId.eq(department_id.to_string()));
        }
        if let Some(from) = filter.from {
            query = query.filter(expenses::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(expenses::Column::CreatedAt.lte(to));
        }
        if let Some(min) = filter.min_amount_minor {
            query = query.filter(expenses::Column::AmountMinor.gte(min));
        }
        if let Some(max) = filter.max_amount_minor {
            query = query.filter(expenses::Column::AmountMinor.lte(max));
        }

        let all = query
            .all(&self.database)
            .await?
            .into_iter()
            .map(Expense::try_from)
            .collect::<ResultEngine<Vec<_>>>()?;

        let paged = paginate(all, page, limit);
        self.cache_write(&key, &paged, cache::SEARCH_TTL);
        Ok(paged)
    }

    /// Lists ledger entries, newest first, optionally filtered by the
    /// owning user's company.
    pub async fn list_reimbursements(
        &self,
        location: Option<&str>,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> ResultEngine<Paged<ReimbursementEntry>> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(50);
        let key = cache::keys::reimbursements_all(location.unwrap_or("all"), page, limit);
        if let Some(hit) = self.cache_read(&key) {
            return Ok(hit);
        }

        let mut query =
            reimbursements::Entity::find().order_by_desc(reimbursements::Column::CreatedAt);
        if let Some(location) = location {
            query = query
                .join(JoinType::InnerJoin, reimbursements::Relation::Users.def())
                .filter(users::Column::Company.eq(location));
        }

        let all = query
            .all(&self.database)
            .await?
            .into_iter()
            .map(ReimbursementEntry::try_from)
            .collect::<ResultEngine<Vec<_>>>()?;

        let paged = paginate(all, page, limit);
        self.cache_write(&key, &paged, cache::REIMBURSEMENT_LIST_TTL);
        Ok(paged)
    }

    /// One user's ledger history, open entry first.
    pub async fn reimbursements_for_user(
        &self,
        user_id: &str,
    ) -> ResultEngine<Vec<ReimbursementEntry>> {
        let key = cache::keys::reimbursements_user(user_id);
        if let Some(hit) = self.cache_read(&key) {
            return Ok(hit);
        }

        let all = reimbursements::Entity::find()
            .filter(reimbursements::Column::UserId.eq(user_id))
            .order_by_asc(reimbursements::Column::IsReimbursed)
            .order_by_desc(reimbursements::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(ReimbursementEntry::try_from)
            .collect::<ResultEngine<Vec<_>>>()?;

        self.cache_write(&key, &all, cache::REIMBURSEMENT_LIST_TTL);
        Ok(all)
    }
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    cache: Option<Arc<dyn Cache>>,
    dispatcher: Option<Arc<dyn NotificationPort>>,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, database: DatabaseConnection) -> EngineBuilder {
        self.database = database;
        self
    }

    /// Override the default in-process read cache.
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> EngineBuilder {
        self.cache = Some(cache);
        self
    }

    /// Override the default logging notification dispatcher.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn NotificationPort>) -> EngineBuilder {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Construct `Engine`
    pub fn build(self) -> Engine {
        Engine {
            database: self.database,
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(MemoryCache::new())),
            dispatcher: self
                .dispatcher
                .unwrap_or_else(|| Arc::new(LoggingDispatcher)),
        }
    }
}

#[cfg(test)]
mod tests {
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ConnectOptions, Database};

    use super::*;

    async fn engine() -> Engine {
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        options.max_connections(1);
        let database = Database::connect(options).await.unwrap();
        Migrator::up(&database, None).await.unwrap();
        Engine::builder().database(database).build()
    }

    async fn seed_user(engine: &Engine, username: &str) {
        users::ActiveModel {
            username: ActiveValue::Set(username.to_string()),
            password: ActiveValue::Set("secret".to_string()),
            role: ActiveValue::Set(ROLE_EMPLOYEE.to_string()),
            company: ActiveValue::Set("Milan".to_string()),
            two_factor_pending: ActiveValue::Set(false),
            two_factor_verified: ActiveValue::Set(true),
            allocated_minor: ActiveValue::Set(0),
            spent_minor: ActiveValue::Set(0),
            budget_left_minor: ActiveValue::Set(0),
            reimbursed_minor: ActiveValue::Set(0),
        }
        .insert(&engine.database)
        .await
        .unwrap();
    }

    async fn seed_department(engine: &Engine) -> Uuid {
        let id = Uuid::new_v4();
        departments::ActiveModel {
            id: ActiveValue::Set(id.to_string()),
            name: ActiveValue::Set("Travel".to_string()),
        }
        .insert(&engine.database)
        .await
        .unwrap();
        id
    }

    fn expense_cmd(user_id: &str, amount_minor: i64, department_id: Uuid) -> ExpenseCmd {
        ExpenseCmd {
            user_id: user_id.to_string(),
            amount_minor,
            department_id,
            sub_department_id: None,
            payment_method: "card".to_string(),
            note: None,
            proof_url: None,
        }
    }

    fn allocation_cmd(user_id: &str, amount_minor: i64) -> AllocationCmd {
        AllocationCmd {
            user_id: user_id.to_string(),
            amount_minor,
            company: "Milan".to_string(),
        }
    }

    #[tokio::test]
    async fn funded_expense_consumes_bucket() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;
        let department = seed_department(&engine).await;

        engine
            .allocate_budget(allocation_cmd("mrossi", 1000))
            .await
            .unwrap();
        let expense = engine
            .submit_expense(expense_cmd("mrossi", 400, department))
            .await
            .unwrap();

        assert_eq!(expense.from_allocation_minor, 400);
        assert_eq!(expense.from_reimbursement_minor, 0);
        assert!(expense.reimbursement_id.is_none());

        let buckets = engine.buckets_oldest_first("mrossi").await.unwrap();
        assert_eq!(buckets[0].spent_minor, 400);
        assert_eq!(buckets[0].remaining_minor, 600);

        let aggregate = engine.user_summary("mrossi").await.unwrap();
        assert_eq!(aggregate.allocated_minor, 1000);
        assert_eq!(aggregate.spent_minor, 400);
        assert_eq!(aggregate.budget_left_minor, 600);
        assert_eq!(aggregate.reimbursed_minor, 0);
    }

    #[tokio::test]
    async fn shortfall_lands_on_open_entry() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;
        let department = seed_department(&engine).await;

        engine
            .allocate_budget(allocation_cmd("mrossi", 1000))
            .await
            .unwrap();
        engine
            .submit_expense(expense_cmd("mrossi", 400, department))
            .await
            .unwrap();
        let expense = engine
            .submit_expense(expense_cmd("mrossi", 1000, department))
            .await
            .unwrap();

        assert_eq!(expense.from_allocation_minor, 600);
        assert_eq!(expense.from_reimbursement_minor, 400);
        assert_eq!(
            expense.from_allocation_minor + expense.from_reimbursement_minor,
            expense.amount_minor
        );

        let buckets = engine.buckets_oldest_first("mrossi").await.unwrap();
        assert_eq!(buckets[0].remaining_minor, 0);

        let entry = engine.open_entry("mrossi").await.unwrap().unwrap();
        assert_eq!(entry.amount_minor, 400);
        assert_eq!(entry.last_expense_id, Some(expense.id));
        assert_eq!(expense.reimbursement_id, Some(entry.id));

        let aggregate = engine.user_summary("mrossi").await.unwrap();
        assert_eq!(aggregate.spent_minor, 1400);
        assert_eq!(aggregate.budget_left_minor, 0);
        assert_eq!(aggregate.reimbursed_minor, 400);
    }

    #[tokio::test]
    async fn allocation_offsets_open_entry_and_grants_fresh_bucket() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;
        let department = seed_department(&engine).await;

        engine
            .allocate_budget(allocation_cmd("mrossi", 1000))
            .await
            .unwrap();
        engine
            .submit_expense(expense_cmd("mrossi", 1400, department))
            .await
            .unwrap();

        let (budget, update) = engine
            .allocate_budget(allocation_cmd("mrossi", 250))
            .await
            .unwrap();

        assert_eq!(budget.allocated_minor, 250);
        assert_eq!(budget.remaining_minor, 250);
        assert_eq!(update.unwrap().amount_minor, 150);

        let aggregate = engine.user_summary("mrossi").await.unwrap();
        assert_eq!(aggregate.allocated_minor, 1250);
        assert_eq!(aggregate.budget_left_minor, 250);
    }

    #[tokio::test]
    async fn allocation_larger_than_liability_clamps_at_zero() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;
        let department = seed_department(&engine).await;

        engine
            .submit_expense(expense_cmd("mrossi", 300, department))
            .await
            .unwrap();
        let (_, update) = engine
            .allocate_budget(allocation_cmd("mrossi", 1000))
            .await
            .unwrap();

        assert_eq!(update.unwrap().amount_minor, 0);
    }

    #[tokio::test]
    async fn expense_without_buckets_is_all_liability() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;
        let department = seed_department(&engine).await;

        let expense = engine
            .submit_expense(expense_cmd("mrossi", 500, department))
            .await
            .unwrap();

        assert_eq!(expense.from_allocation_minor, 0);
        assert_eq!(expense.from_reimbursement_minor, 500);
        assert!(expense.budget_ids.is_empty());

        let entry = engine.open_entry("mrossi").await.unwrap().unwrap();
        assert_eq!(entry.amount_minor, 500);
    }

    #[tokio::test]
    async fn allocation_with_no_liability_is_pure_bucket_creation() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;

        let (budget, update) = engine
            .allocate_budget(allocation_cmd("mrossi", 800))
            .await
            .unwrap();

        assert!(update.is_none());
        assert_eq!(budget.remaining_minor, 800);
        assert!(engine.open_entry("mrossi").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn consumption_is_fifo_across_buckets() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;
        let department = seed_department(&engine).await;

        for _ in 0..3 {
            engine
                .allocate_budget(allocation_cmd("mrossi", 300))
                .await
                .unwrap();
        }

        let expense = engine
            .submit_expense(expense_cmd("mrossi", 700, department))
            .await
            .unwrap();
        assert_eq!(expense.from_allocation_minor, 700);
        assert_eq!(expense.budget_ids.len(), 3);

        let buckets = engine.buckets_oldest_first("mrossi").await.unwrap();
        assert_eq!(buckets[0].remaining_minor, 0);
        assert_eq!(buckets[1].remaining_minor, 0);
        assert_eq!(buckets[2].remaining_minor, 200);
    }

    #[tokio::test]
    async fn audit_snapshot_includes_untouched_buckets() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;
        let department = seed_department(&engine).await;

        engine
            .allocate_budget(allocation_cmd("mrossi", 500))
            .await
            .unwrap();
        engine
            .allocate_budget(allocation_cmd("mrossi", 500))
            .await
            .unwrap();

        let expense = engine
            .submit_expense(expense_cmd("mrossi", 100, department))
            .await
            .unwrap();

        // The second bucket contributed nothing but was consulted.
        assert_eq!(expense.budget_ids.len(), 2);
        let buckets = engine.buckets_oldest_first("mrossi").await.unwrap();
        assert_eq!(buckets[1].spent_minor, 0);
    }

    #[tokio::test]
    async fn mark_paid_conflicts_on_repeat_and_reverts_cleanly() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;
        let department = seed_department(&engine).await;

        engine
            .submit_expense(expense_cmd("mrossi", 500, department))
            .await
            .unwrap();
        let entry = engine.open_entry("mrossi").await.unwrap().unwrap();

        let paid = engine.set_reimbursed(entry.id, true).await.unwrap();
        assert!(paid.is_reimbursed);
        assert!(paid.reimbursed_at.is_some());

        let repeat = engine.set_reimbursed(entry.id, true).await;
        assert!(matches!(repeat, Err(EngineError::Conflict(_))));

        let reverted = engine.set_reimbursed(entry.id, false).await.unwrap();
        assert!(!reverted.is_reimbursed);
        assert!(reverted.reimbursed_at.is_none());
        assert_eq!(reverted.amount_minor, 500);

        // Reverting an already pending entry stays a no-op success.
        let again = engine.set_reimbursed(entry.id, false).await.unwrap();
        assert!(!again.is_reimbursed);
    }

    #[tokio::test]
    async fn settled_entry_is_not_reused_for_new_shortfall() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;
        let department = seed_department(&engine).await;

        engine
            .submit_expense(expense_cmd("mrossi", 500, department))
            .await
            .unwrap();
        let first = engine.open_entry("mrossi").await.unwrap().unwrap();
        engine.set_reimbursed(first.id, true).await.unwrap();

        engine
            .submit_expense(expense_cmd("mrossi", 200, department))
            .await
            .unwrap();
        let second = engine.open_entry("mrossi").await.unwrap().unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(second.amount_minor, 200);
    }

    #[tokio::test]
    async fn reown_moves_bucket_between_users() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;
        seed_user(&engine, "gverdi").await;
        let department = seed_department(&engine).await;

        let (budget, _) = engine
            .allocate_budget(allocation_cmd("mrossi", 1000))
            .await
            .unwrap();
        engine
            .submit_expense(expense_cmd("mrossi", 300, department))
            .await
            .unwrap();

        engine
            .update_budget(
                budget.id,
                BudgetPatch {
                    amount_minor: None,
                    user_id: Some("gverdi".to_string()),
                },
            )
            .await
            .unwrap();

        let from = engine.user_summary("mrossi").await.unwrap();
        let to = engine.user_summary("gverdi").await.unwrap();

        assert_eq!(from.allocated_minor, 0);
        assert_eq!(from.budget_left_minor, 0);
        assert_eq!(to.allocated_minor, 1000);
        assert_eq!(to.spent_minor, 300);
        assert_eq!(to.budget_left_minor, 700);
    }

    #[tokio::test]
    async fn resize_below_spent_is_rejected() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;
        let department = seed_department(&engine).await;

        let (budget, _) = engine
            .allocate_budget(allocation_cmd("mrossi", 1000))
            .await
            .unwrap();
        engine
            .submit_expense(expense_cmd("mrossi", 300, department))
            .await
            .unwrap();

        let result = engine
            .update_budget(
                budget.id,
                BudgetPatch {
                    amount_minor: Some(200),
                    user_id: None,
                },
            )
            .await;
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn unresolvable_department_aborts_before_any_write() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;

        let result = engine
            .submit_expense(expense_cmd("mrossi", 500, Uuid::new_v4()))
            .await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
        assert!(engine.open_entry("mrossi").await.unwrap().is_none());
        assert_eq!(
            engine.user_summary("mrossi").await.unwrap().spent_minor,
            0
        );
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let engine = engine().await;
        let result = engine.allocate_budget(allocation_cmd("ghost", 100)).await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_reflects_mutations_immediately() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;

        engine
            .allocate_budget(allocation_cmd("mrossi", 500))
            .await
            .unwrap();
        let first = engine
            .list_budgets(None, Some("mrossi"), 1, 10)
            .await
            .unwrap();
        assert_eq!(first.meta.total_items, 1);

        // A second allocation must not be hidden by the cached first read.
        engine
            .allocate_budget(allocation_cmd("mrossi", 500))
            .await
            .unwrap();
        let second = engine
            .list_budgets(None, Some("mrossi"), 1, 10)
            .await
            .unwrap();
        assert_eq!(second.meta.total_items, 2);
    }

    #[tokio::test]
    async fn list_pagination_slices_but_keeps_full_set() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;

        for _ in 0..5 {
            engine
                .allocate_budget(allocation_cmd("mrossi", 100))
                .await
                .unwrap();
        }

        let page = engine
            .list_budgets(None, Some("mrossi"), 2, 2)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.all.len(), 5);
        assert_eq!(page.meta.total_pages, 3);
        assert_eq!(page.meta.page, 2);
    }

    #[tokio::test]
    async fn search_filters_compose() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;
        seed_user(&engine, "gverdi").await;

        engine
            .allocate_budget(allocation_cmd("mrossi", 100))
            .await
            .unwrap();
        engine
            .allocate_budget(allocation_cmd("mrossi", 900))
            .await
            .unwrap();
        engine
            .allocate_budget(allocation_cmd("gverdi", 900))
            .await
            .unwrap();

        let filter = BudgetFilter {
            user_id: Some("mrossi".to_string()),
            min_allocated_minor: Some(500),
            ..Default::default()
        };
        let found = engine.search_budgets(&filter, None, 1, 10).await.unwrap();

        assert_eq!(found.meta.total_items, 1);
        assert_eq!(found.items[0].allocated_minor, 900);
    }

    #[tokio::test]
    async fn reimbursement_history_lists_open_entry_first() {
        let engine = engine().await;
        seed_user(&engine, "mrossi").await;
        let department = seed_department(&engine).await;

        engine
            .submit_expense(expense_cmd("mrossi", 500, department))
            .await
            .unwrap();
        let first = engine.open_entry("mrossi").await.unwrap().unwrap();
        engine.set_reimbursed(first.id, true).await.unwrap();
        engine
            .submit_expense(expense_cmd("mrossi", 200, department))
            .await
            .unwrap();

        let history = engine.reimbursements_for_user("mrossi").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_reimbursed);
        assert!(history[1].is_reimbursed);
    }
}
