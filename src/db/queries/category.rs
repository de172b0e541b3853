use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::app_state::AppState;
use crate::db::models::category::{
    CategoriesData, Category, CategoryBody, CreateCategoryPayload, Item, ItemInput, ItemState,
    UpdateCategoryPayload,
};
use crate::services::access::parse_id;
use crate::utils::api_response::ApiResponse;
use crate::utils::error::AppError;

fn category_not_found() -> AppError {
    AppError::not_found("Category not found")
}

#[utoipa::path(
    post,
    path = "/categories/createCategory",
    request_body = CreateCategoryPayload,
    responses(
        (status = 201, description = "Category created", body = CategoryBody),
        (status = 400, description = "Name, description and rank are required"),
        (status = 409, description = "A category with this name already exists")
    ),
    tag = "Categories"
)]
pub async fn create_category(
    State(state): State<AppState>,
    Json(payload): Json<CreateCategoryPayload>,
) -> Result<ApiResponse<CategoryBody>, ApiResponse<()>> {
    let new_category = payload.validate()?;
    let category = state
        .store
        .create_category(&new_category)
        .await
        .map_err(AppError::from)?;

    info!(category_id = %category.id, name = %category.name, "Category created");
    Ok(ApiResponse::success(StatusCode::CREATED, "Category created", CategoryBody { category }))
}

#[utoipa::path(
    get,
    path = "/categories/getCategories",
    responses(
        (status = 200, description = "Categories sorted by rank", body = CategoriesData)
    ),
    tag = "Categories"
)]
pub async fn get_categories(
    State(state): State<AppState>,
) -> Result<ApiResponse<CategoriesData>, ApiResponse<()>> {
    let categories_data = state.store.list_categories().await.map_err(AppError::from)?;
    Ok(ApiResponse::success(
        StatusCode::OK,
        "Categories retrieved successfully",
        CategoriesData { categories_data },
    ))
}

#[utoipa::path(
    get,
    path = "/categories/getCategoryById/{id}",
    params(("id" = String, Path, description = "Category ID")),
    responses(
        (status = 200, description = "Category found", body = CategoryBody),
        (status = 404, description = "Category not found")
    ),
    tag = "Categories"
)]
pub async fn get_category_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<CategoryBody>, ApiResponse<()>> {
    let id = parse_id(&id).ok_or_else(category_not_found)?;
    let category = state
        .store
        .find_category(id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(category_not_found)?;

    Ok(ApiResponse::success(StatusCode::OK, "Category retrieved successfully", CategoryBody { category }))
}

#[utoipa::path(
    patch,
    path = "/categories/updateCategory",
    request_body = UpdateCategoryPayload,
    responses(
        (status = 200, description = "Category updated", body = CategoryBody),
        (status = 400, description = "Missing _id or invalid items"),
        (status = 404, description = "Category not found"),
        (status = 409, description = "A category with this name already exists")
    ),
    tag = "Categories"
)]
pub async fn update_category(
    State(state): State<AppState>,
    Json(payload): Json<UpdateCategoryPayload>,
) -> Result<ApiResponse<CategoryBody>, ApiResponse<()>> {
    let update = payload.validate()?.ok_or_else(category_not_found)?;
    let category = state
        .store
        .update_category(&update)
        .await
        .map_err(AppError::from)?
        .ok_or_else(category_not_found)?;

    info!(category_id = %category.id, items = category.items.len(), "Category updated");
    Ok(ApiResponse::success(StatusCode::OK, "Category updated successfully", CategoryBody { category }))
}

#[utoipa::path(
    delete,
    path = "/categories/deleteCategory/{id}",
    params(("id" = String, Path, description = "Category ID")),
    responses(
        (status = 200, description = "Category deleted successfully"),
        (status = 404, description = "Category not found")
    ),
    tag = "Categories"
)]
pub async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<()>, ApiResponse<()>> {
    let id = parse_id(&id).ok_or_else(category_not_found)?;
    if !state.store.delete_category(id).await.map_err(AppError::from)? {
        return Err(category_not_found().into());
    }

    info!(category_id = %id, "Category deleted");
    Ok(ApiResponse::success(StatusCode::OK, "Category deleted successfully", ()))
}

use utoipa::OpenApi;
#[derive(OpenApi)]
#[openapi(
    paths(
        create_category,
        get_categories,
        get_category_by_id,
        update_category,
        delete_category
    ),
    components(schemas(
        Category,
        Item,
        ItemState,
        ItemInput,
        CategoryBody,
        CategoriesData,
        CreateCategoryPayload,
        UpdateCategoryPayload
    )),
    tags(
        (name = "Categories", description = "Catalogue of categories and their items")
    )
)]
pub struct CategoryDoc;
