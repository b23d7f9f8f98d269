use axum::{routing::get, Router};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::database::repositories::MarketDataRepository;

use super::handlers::*;
use super::openapi::ApiDoc;

/// Create the API router with Swagger UI
pub fn create_router(repository: Arc<dyn MarketDataRepository>) -> Router {
    let state = ApiState { repository };

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(get_status))
        .route("/api/v1/instruments", get(get_instruments))
        .route("/api/v1/candles", get(get_candles))
        .with_state(state)
}
