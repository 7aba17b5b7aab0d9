//! The module contains the users entity used by the auth middleware and the
//! dashboard summary endpoint.

use api_types::user::UserSummary;
use axum::{Extension, Json, extract::Path, extract::State};
use sea_orm::entity::prelude::*;

use crate::{ServerError, server::ServerState};
use engine::RequestContext;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
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
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Handle requests for the denormalized dashboard totals of one user.
pub async fn summary(
    Extension(ctx): Extension<RequestContext>,
    State(state): State<ServerState>,
    Path(username): Path<String>,
) -> Result<Json<UserSummary>, ServerError> {
    ctx.require_self_or_admin(&username)?;

    let aggregate = state.engine.user_summary(&username).await?;
    Ok(Json(UserSummary {
        username,
        allocated_minor: aggregate.allocated_minor,
        spent_minor: aggregate.spent_minor,
        budget_left_minor: aggregate.budget_left_minor,
        reimbursed_minor: aggregate.reimbursed_minor,
    }))
}
