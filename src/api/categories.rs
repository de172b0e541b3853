use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use crate::app_state::AppState;
use crate::db::queries::category::*;

/// Public catalogue reads.
pub fn category_routes() -> Router<AppState> {
    Router::new()
        .route("/categories/getCategories", get(get_categories))
        .route("/categories/getCategoryById/{id}", get(get_category_by_id))
}

pub fn admin_category_routes() -> Router<AppState> {
    Router::new()
        .route("/categories/createCategory", post(create_category))
        .route("/categories/updateCategory", patch(update_category))
        .route("/categories/deleteCategory/{id}", delete(delete_category))
}
