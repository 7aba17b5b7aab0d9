use axum::{Json, http::StatusCode, response::IntoResponse};
use engine::EngineError;

use serde::Serialize;
pub use server::{run, run_with_listener, spawn_with_listener};

mod budget;
mod expense;
mod reimbursement;
mod server;
mod user;

pub mod types {
    pub mod budget {
        pub use api_types::budget::{
            AllocateNew, AllocationResponse, BudgetListParams, BudgetListResponse,
            BudgetSearchParams, BudgetUpdate, BudgetView,
        };
    }

    pub mod expense {
        pub use api_types::expense::{
            ExpenseCreated, ExpenseListParams, ExpenseListResponse, ExpenseSearchParams,
            ExpenseUpdate, ExpenseView,
        };
    }

    pub mod reimbursement {
        pub use api_types::reimbursement::{
            ReimbursementListParams, ReimbursementListResponse, ReimbursementSet,
            ReimbursementView,
        };
    }

    pub mod user {
        pub use api_types::user::UserSummary;
    }
}

pub enum ServerError {
    Engine(EngineError),
    Generic(String),
}

//TODO: Find a better solution
#[derive(Serialize)]
struct Error {
    error: String,
}

fn status_for_engine_error(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        EngineError::InvalidArgument(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::Upstream(_) => StatusCode::BAD_GATEWAY,
        EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn message_for_engine_error(err: EngineError) -> String {
    match err {
        EngineError::Database(db_err) => {
            tracing::error!("database error: {db_err}");
            "internal server error".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let (status, error) = match self {
            ServerError::Engine(err) => {
                (status_for_engine_error(&err), message_for_engine_error(err))
            }
            ServerError::Generic(err) => (StatusCode::BAD_REQUEST, err),
        };

        (status, Json(Error { error })).into_response()
    }
}

impl From<EngineError> for ServerError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

fn page_meta(meta: engine::PageMeta) -> api_types::PageMeta {
    api_types::PageMeta {
        page: meta.page,
        limit: meta.limit,
        total_items: meta.total_items,
        total_pages: meta.total_pages,
    }
}
