//! Reimbursement API endpoints

use api_types::reimbursement::{
    ReimbursementListParams, ReimbursementListResponse, ReimbursementSet, ReimbursementView,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use crate::{ServerError, page_meta, server::ServerState};
use engine::RequestContext;

pub(crate) fn view(entry: engine::ReimbursementEntry) -> ReimbursementView {
    ReimbursementView {
        id: entry.id,
        user_id: entry.user_id,
        amount_minor: entry.amount_minor,
        is_reimbursed: entry.is_reimbursed,
        reimbursed_at: entry.reimbursed_at,
        last_expense_id: entry.last_expense_id,
        created_at: entry.created_at,
    }
}

/// Handle requests for the ledger overview (admin only).
pub async fn list(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    Query(params): Query<ReimbursementListParams>,
) -> Result<Json<ReimbursementListResponse>, ServerError> {
    ctx.require_admin()?;

    let paged = state
        .engine
        .list_reimbursements(params.location.as_deref(), params.page, params.limit)
        .await?;

    Ok(Json(ReimbursementListResponse {
        reimbursements: paged.items.into_iter().map(view).collect(),
        all_reimbursements: paged.all.into_iter().map(view).collect(),
        meta: page_meta(paged.meta),
    }))
}

/// Handle requests for one user's ledger history, open entry first.
pub async fn for_user(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ReimbursementView>>, ServerError> {
    ctx.require_self_or_admin(&user_id)?;

    let entries = state.engine.reimbursements_for_user(&user_id).await?;
    Ok(Json(entries.into_iter().map(view).collect()))
}

/// Handle the admin settlement transition on one ledger entry.
pub async fn set_status(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReimbursementSet>,
) -> Result<Json<ReimbursementView>, ServerError> {
    ctx.require_admin()?;

    let entry = state
        .engine
        .set_reimbursed(id, payload.is_reimbursed)
        .await?;
    Ok(Json(view(entry)))
}
