//! Expense API endpoints

use api_types::expense::{
    ExpenseCreated, ExpenseListParams, ExpenseListResponse, ExpenseSearchParams, ExpenseUpdate,
    ExpenseView,
};
use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{ServerError, page_meta, server::ServerState};
use engine::{ExpenseCmd, ExpensePatch, RequestContext};

pub(crate) fn view(expense: engine::Expense) -> ExpenseView {
    ExpenseView {
        id: expense.id,
        user_id: expense.user_id,
        amount_minor: expense.amount_minor,
        from_allocation_minor: expense.from_allocation_minor,
        from_reimbursement_minor: expense.from_reimbursement_minor,
        department_id: expense.department_id,
        sub_department_id: expense.sub_department_id,
        budget_ids: expense.budget_ids,
        reimbursement_id: expense.reimbursement_id,
        payment_method: expense.payment_method,
        note: expense.note,
        proof_url: expense.proof_url,
        created_at: expense.created_at,
    }
}

fn list_response(paged: engine::Paged<engine::Expense>) -> ExpenseListResponse {
    ExpenseListResponse {
        expenses: paged.items.into_iter().map(view).collect(),
        all_expenses: paged.all.into_iter().map(view).collect(),
        meta: page_meta(paged.meta),
    }
}

/// Collected multipart fields of an expense submission.
#[derive(Default)]
struct ExpenseForm {
    user_id: Option<String>,
    amount_minor: Option<i64>,
    department_id: Option<Uuid>,
    sub_department_id: Option<Uuid>,
    payment_method: Option<String>,
    note: Option<String>,
    proof: Option<(String, Vec<u8>)>,
}

async fn read_form(mut multipart: Multipart) -> Result<ExpenseForm, ServerError> {
    let mut form = ExpenseForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ServerError::Generic(err.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "proof" => {
                let filename = field.file_name().unwrap_or("proof").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ServerError::Generic(err.to_string()))?;
                form.proof = Some((filename, bytes.to_vec()));
            }
            _ => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| ServerError::Generic(err.to_string()))?;
                match name.as_str() {
                    "user_id" => form.user_id = Some(text),
                    "amount_minor" => {
                        form.amount_minor = Some(text.parse().map_err(|_| {
                            ServerError::Generic("amount_minor must be an integer".to_string())
                        })?);
                    }
                    "department_id" => {
                        form.department_id = Some(Uuid::parse_str(&text).map_err(|_| {
                            ServerError::Generic("department_id must be a UUID".to_string())
                        })?);
                    }
                    "sub_department_id" => {
                        form.sub_department_id = Some(Uuid::parse_str(&text).map_err(|_| {
                            ServerError::Generic("sub_department_id must be a UUID".to_string())
                        })?);
                    }
                    "payment_method" => form.payment_method = Some(text),
                    "note" => form.note = Some(text),
                    _ => {}
                }
            }
        }
    }

    Ok(form)
}

/// Handle multipart expense submissions (proof file + fields).
///
/// The proof upload runs before the engine is called: a failing file store
/// aborts the request with no ledger mutation.
pub async fn create(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ExpenseCreated>), ServerError> {
    ctx.require_session()?;

    let form = read_form(multipart).await?;
    let amount_minor = form
        .amount_minor
        .ok_or_else(|| ServerError::Generic("amount_minor is required".to_string()))?;
    let department_id = form
        .department_id
        .ok_or_else(|| ServerError::Generic("department_id is required".to_string()))?;

    // Submitting on behalf of another user is an admin action.
    let user_id = match form.user_id {
        Some(target) if target != ctx.user_id => {
            ctx.require_admin()?;
            target
        }
        _ => ctx.user_id.clone(),
    };

    let proof_url = match form.proof {
        Some((filename, bytes)) => Some(state.files.store(&bytes, &filename, "proofs")?),
        None => None,
    };

    let expense = state
        .engine
        .submit_expense(ExpenseCmd {
            user_id,
            amount_minor,
            department_id,
            sub_department_id: form.sub_department_id,
            payment_method: form.payment_method.unwrap_or_else(|| "card".to_string()),
            note: form.note,
            proof_url,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ExpenseCreated {
            expense: view(expense),
        }),
    ))
}

/// Handle requests for listing expenses. Non-admin callers only ever see
/// their own.
pub async fn list(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    Query(params): Query<ExpenseListParams>,
) -> Result<Json<ExpenseListResponse>, ServerError> {
    ctx.require_session()?;

    let user_scope = if ctx.is_admin() {
        None
    } else {
        Some(ctx.user_id.clone())
    };
    let paged = state
        .engine
        .list_expenses(
            params.location.as_deref(),
            user_scope.as_deref(),
            params.page.unwrap_or(1),
            params.limit.unwrap_or(10),
        )
        .await?;

    Ok(Json(list_response(paged)))
}

/// Handle requests for searching expenses by filter set.
pub async fn search(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    Query(params): Query<ExpenseSearchParams>,
) -> Result<Json<ExpenseListResponse>, ServerError> {
    ctx.require_session()?;

    let mut filter = engine::ExpenseFilter {
        user_id: params.user_id,
        department_id: params.department_id,
        from: params.from,
        to: params.to,
        min_amount_minor: params.min_amount_minor,
        max_amount_minor: params.max_amount_minor,
    };
    if !ctx.is_admin() {
        filter.user_id = Some(ctx.user_id.clone());
    }

    let paged = state
        .engine
        .search_expenses(&filter, params.page.unwrap_or(1), params.limit.unwrap_or(10))
        .await?;

    Ok(Json(list_response(paged)))
}

/// Handle requests for one user's expenses.
pub async fn for_user(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    Path(user_id): Path<String>,
    Query(params): Query<ExpenseListParams>,
) -> Result<Json<ExpenseListResponse>, ServerError> {
    ctx.require_self_or_admin(&user_id)?;

    let paged = state
        .engine
        .list_expenses(
            None,
            Some(&user_id),
            params.page.unwrap_or(1),
            params.limit.unwrap_or(10),
        )
        .await?;

    Ok(Json(list_response(paged)))
}

/// Handle admin corrections of an expense's metadata.
pub async fn update(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ExpenseUpdate>,
) -> Result<Json<ExpenseView>, ServerError> {
    ctx.require_admin()?;

    let expense = state
        .engine
        .update_expense(
            id,
            ExpensePatch {
                department_id: payload.department_id,
                sub_department_id: payload.sub_department_id,
                payment_method: payload.payment_method,
                note: payload.note,
                proof_url: payload.proof_url,
            },
        )
        .await?;

    Ok(Json(view(expense)))
}
