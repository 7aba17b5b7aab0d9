use axum::{
    Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, patch, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Basic},
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};

use std::sync::Arc;

use crate::{budget, expense, reimbursement, user};
use engine::{Engine, FileStorePort, RequestContext};

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<Engine>,
    pub db: DatabaseConnection,
    pub files: Arc<dyn FileStorePort>,
}

fn context_for(user: &user::Model) -> RequestContext {
    RequestContext {
        authenticated: true,
        two_factor_pending: user.two_factor_pending,
        two_factor_verified: user.two_factor_verified,
        role: user.role.clone(),
        user_id: user.username.clone(),
    }
}

async fn auth(
    auth_header: TypedHeader<Authorization<Basic>>,
    State(state): State<ServerState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if auth_header.username().is_empty() || auth_header.password().is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let user: Option<user::Model> = user::Entity::find()
        .filter(user::Column::Username.eq(auth_header.username()))
        .filter(user::Column::Password.eq(auth_header.password()))
        .one(&state.db)
        .await
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let Some(user) = user else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    request.extensions_mut().insert(context_for(&user));
    Ok(next.run(request).await)
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/budget/allocate", post(budget::allocate))
        .route("/budget", get(budget::list))
        .route("/budget/search", get(budget::search))
        .route("/budget/user/{user_id}", get(budget::for_user))
        .route("/budget/{id}", patch(budget::update))
        .route("/expenses/create", post(expense::create))
        .route("/expenses", get(expense::list))
        .route("/expenses/search", get(expense::search))
        .route("/expenses/user/{user_id}", get(expense::for_user))
        .route("/expenses/{id}", patch(expense::update))
        .route("/reimbursement", get(reimbursement::list))
        .route("/reimbursement/{user_id}", get(reimbursement::for_user))
        .route("/reimbursement/admin/{id}", patch(reimbursement::set_status))
        .route("/users/{username}/summary", get(user::summary))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth))
        .with_state(state)
}

pub async fn run(engine: Engine, db: DatabaseConnection, files: Arc<dyn FileStorePort>) {
    let listener = match tokio::net::TcpListener::bind("127.0.0.1:3000").await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("failed to bind server listener: {err}");
            return;
        }
    };
    if let Err(err) = run_with_listener(engine, db, files, listener).await {
        tracing::error!("server failed: {err}");
    }
}

pub async fn run_with_listener(
    engine: Engine,
    db: DatabaseConnection,
    files: Arc<dyn FileStorePort>,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    let state = ServerState {
        engine: Arc::new(engine),
        db,
        files,
    };

    axum::serve(listener, router(state)).await
}

pub fn spawn_with_listener(
    engine: Engine,
    db: DatabaseConnection,
    files: Arc<dyn FileStorePort>,
    listener: tokio::net::TcpListener,
) -> Result<std::net::SocketAddr, std::io::Error> {
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = run_with_listener(engine, db, files, listener).await {
            tracing::error!("server failed: {err}");
        }
    });

    Ok(addr)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode, header},
    };
    use base64::Engine as _;
    use http_body_util::BodyExt;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ActiveModelTrait, ActiveValue, ConnectOptions, Database};
    use tower::ServiceExt;

    use super::*;
    use crate::types::budget::{AllocationResponse, BudgetListResponse};
    use crate::types::user::UserSummary;

    async fn state() -> ServerState {
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        options.max_connections(1);
        let db = Database::connect(options).await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let engine = Engine::builder().database(db.clone()).build();
        let files: Arc<dyn FileStorePort> = Arc::new(engine::LocalFileStore::new(
            std::env::temp_dir().join("notaspese-server-tests"),
            "http://localhost:3000/files".to_string(),
        ));

        ServerState {
            engine: Arc::new(engine),
            db,
            files,
        }
    }

    async fn seed_user(state: &ServerState, username: &str, role: &str, verified: bool) {
        user::ActiveModel {
            username: ActiveValue::Set(username.to_string()),
            password: ActiveValue::Set("secret".to_string()),
            role: ActiveValue::Set(role.to_string()),
            company: ActiveValue::Set("Milan".to_string()),
            two_factor_pending: ActiveValue::Set(false),
            two_factor_verified: ActiveValue::Set(verified),
            allocated_minor: ActiveValue::Set(0),
            spent_minor: ActiveValue::Set(0),
            budget_left_minor: ActiveValue::Set(0),
            reimbursed_minor: ActiveValue::Set(0),
        }
        .insert(&state.db)
        .await
        .unwrap();
    }

    fn basic(username: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(format!("{username}:secret"))
        )
    }

    fn get(uri: &str, username: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, basic(username))
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, username: &str, payload: &serde_json::Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, basic(username))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(
        response: axum::response::Response,
    ) -> T {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_credentials_are_rejected() {
        let router = router(state().await);

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/budget")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_credentials_are_unauthorized() {
        let router = router(state().await);

        let response = router.oneshot(get("/budget", "ghost")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unverified_two_factor_is_gated() {
        let state = state().await;
        seed_user(&state, "mrossi", engine::ROLE_EMPLOYEE, false).await;
        let router = router(state);

        let response = router.oneshot(get("/budget", "mrossi")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_allocates_and_owner_reads_back() {
        let state = state().await;
        seed_user(&state, "admin", engine::ROLE_ADMIN, true).await;
        seed_user(&state, "mrossi", engine::ROLE_EMPLOYEE, true).await;
        let router = router(state);

        let payload = serde_json::json!({
            "user_id": "mrossi",
            "amount_minor": 100_000,
            "company": "Milan",
        });
        let response = router
            .clone()
            .oneshot(post_json("/budget/allocate", "admin", &payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: AllocationResponse = json_body(response).await;
        assert_eq!(created.budget.remaining_minor, 100_000);
        assert!(created.reimbursement_update.is_none());

        let response = router
            .clone()
            .oneshot(get("/budget/user/mrossi", "mrossi"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listed: BudgetListResponse = json_body(response).await;
        assert_eq!(listed.meta.total_items, 1);
        assert_eq!(listed.budgets[0].allocated_minor, 100_000);

        let response = router
            .oneshot(get("/users/mrossi/summary", "mrossi"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let summary: UserSummary = json_body(response).await;
        assert_eq!(summary.allocated_minor, 100_000);
        assert_eq!(summary.budget_left_minor, 100_000);
    }

    #[tokio::test]
    async fn employee_cannot_allocate_or_read_others() {
        let state = state().await;
        seed_user(&state, "mrossi", engine::ROLE_EMPLOYEE, true).await;
        seed_user(&state, "gverdi", engine::ROLE_EMPLOYEE, true).await;
        let router = router(state);

        let payload = serde_json::json!({
            "user_id": "mrossi",
            "amount_minor": 100,
            "company": "Milan",
        });
        let response = router
            .clone()
            .oneshot(post_json("/budget/allocate", "mrossi", &payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(get("/budget/user/gverdi", "mrossi"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
