//! Query API (§4.8): five read-only routes over the stored records, all
//! with CORS permitting cross-origin reads.

pub mod compare;
pub mod correlation;
pub mod projects;
pub mod search;
pub mod stats;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/api/search", get(search::search))
        .route("/api/projects", get(projects::projects))
        .route("/api/stats", get(stats::stats))
        .route("/api/compare", get(compare::compare))
        .route("/api/correlation/{id}", get(correlation::correlation))
        .layer(cors)
}
