//! Budget API endpoints

use api_types::budget::{
    AllocateNew, AllocationResponse, BudgetListParams, BudgetListResponse, BudgetSearchParams,
    BudgetUpdate, BudgetView,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{ServerError, page_meta, reimbursement, server::ServerState};
use engine::{AllocationCmd, BudgetPatch, RequestContext};

pub(crate) fn view(budget: engine::Budget) -> BudgetView {
    BudgetView {
        id: budget.id,
        user_id: budget.user_id,
        allocated_minor: budget.allocated_minor,
        spent_minor: budget.spent_minor,
        remaining_minor: budget.remaining_minor,
        month: budget.month,
        year: budget.year,
        company: budget.company,
        created_at: budget.created_at,
    }
}

fn list_response(paged: engine::Paged<engine::Budget>) -> BudgetListResponse {
    BudgetListResponse {
        budgets: paged.items.into_iter().map(view).collect(),
        all_budgets: paged.all.into_iter().map(view).collect(),
        meta: page_meta(paged.meta),
    }
}

/// Handle requests for allocating new budget to a user.
pub async fn allocate(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    Json(payload): Json<AllocateNew>,
) -> Result<(StatusCode, Json<AllocationResponse>), ServerError> {
    ctx.require_admin()?;

    let (budget, update) = state
        .engine
        .allocate_budget(AllocationCmd {
            user_id: payload.user_id,
            amount_minor: payload.amount_minor,
            company: payload.company,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AllocationResponse {
            budget: view(budget),
            reimbursement_update: update.map(reimbursement::view),
        }),
    ))
}

/// Handle requests for listing buckets. Non-admin callers only ever see
/// their own.
pub async fn list(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    Query(params): Query<BudgetListParams>,
) -> Result<Json<BudgetListResponse>, ServerError> {
    ctx.require_session()?;

    let user_scope = if ctx.is_admin() {
        params.user_id
    } else {
        Some(ctx.user_id.clone())
    };
    let paged = state
        .engine
        .list_budgets(
            params.location.as_deref(),
            user_scope.as_deref(),
            params.page.unwrap_or(1),
            params.limit.unwrap_or(10),
        )
        .await?;

    Ok(Json(list_response(paged)))
}

/// Handle requests for searching buckets by filter set.
pub async fn search(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    Query(params): Query<BudgetSearchParams>,
) -> Result<Json<BudgetListResponse>, ServerError> {
    ctx.require_session()?;

    let mut filter = engine::BudgetFilter {
        user_id: params.user_id,
        month: params.month,
        year: params.year,
        company: params.company,
        min_allocated_minor: params.min_allocated_minor,
        max_allocated_minor: params.max_allocated_minor,
    };
    if !ctx.is_admin() {
        filter.user_id = Some(ctx.user_id.clone());
    }

    let paged = state
        .engine
        .search_budgets(
            &filter,
            params.location.as_deref(),
            params.page.unwrap_or(1),
            params.limit.unwrap_or(10),
        )
        .await?;

    Ok(Json(list_response(paged)))
}

/// Handle requests for one user's buckets.
pub async fn for_user(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    Path(user_id): Path<String>,
    Query(params): Query<BudgetListParams>,
) -> Result<Json<BudgetListResponse>, ServerError> {
    ctx.require_self_or_admin(&user_id)?;

    let paged = state
        .engine
        .list_budgets(
            None,
            Some(&user_id),
            params.page.unwrap_or(1),
            params.limit.unwrap_or(10),
        )
        .await?;

    Ok(Json(list_response(paged)))
}

/// Handle admin corrections: resize and/or re-own a bucket.
pub async fn update(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<BudgetUpdate>,
) -> Result<Json<BudgetView>, ServerError> {
    ctx.require_admin()?;

    let budget = state
        .engine
        .update_budget(
            id,
            BudgetPatch {
                amount_minor: payload.amount_minor,
                user_id: payload.user_id,
            },
        )
        .await?;

    Ok(Json(view(budget)))
}
