use axum::extract::State;
use uuid::Uuid;

use super::{ApiJson, ApiPath, non_blank};
use crate::{
    AppState,
    auth::AdminUser,
    envelope::Envelope,
    error::{ApiError, ApiResult},
    models::{CategoriesData, CategoryData, CategoryRequest},
    repository::RepositoryError,
};

const NOT_FOUND: &str = "Category not found";
const DUPLICATE: &str = "Category with this name already exists";

fn category_name(payload: CategoryRequest) -> ApiResult<String> {
    non_blank(payload.name).ok_or_else(|| ApiError::bad_request("Please provide category name"))
}

fn write_error(context: &'static str) -> impl Fn(RepositoryError) -> ApiError {
    move |e| match e {
        RepositoryError::UniqueViolation(_) => ApiError::bad_request(DUPLICATE),
        other => ApiError::internal(context, other),
    }
}

/// list_categories
///
/// [Public Route] All categories, ordered by name.
#[utoipa::path(
    get,
    path = "/api/categories",
    responses((status = 200, description = "Categories", body = CategoriesData)),
    tag = "categories"
)]
pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Envelope<CategoriesData>> {
    let categories = state
        .repo
        .list_categories()
        .await
        .map_err(|e| ApiError::internal("Error fetching categories", e))?;

    Ok(Envelope::ok(
        CategoriesData { categories },
        "Categories fetched successfully",
    ))
}

/// get_category
#[utoipa::path(
    get,
    path = "/api/categories/{id}",
    params(("id" = Uuid, Path, description = "Category ID")),
    responses(
        (status = 200, description = "Category", body = CategoryData),
        (status = 404, description = "Category not found")
    ),
    tag = "categories"
)]
pub async fn get_category(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Envelope<CategoryData>> {
    let category = state
        .repo
        .get_category(id)
        .await?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))?;

    Ok(Envelope::ok(
        CategoryData { category },
        "Category fetched successfully",
    ))
}

/// create_category
///
/// [Admin Route]
#[utoipa::path(
    post,
    path = "/api/categories",
    request_body = CategoryRequest,
    responses(
        (status = 201, description = "Category created", body = CategoryData),
        (status = 400, description = "Blank or duplicate name"),
        (status = 403, description = "Not an admin")
    ),
    tag = "categories"
)]
pub async fn create_category(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CategoryRequest>,
) -> ApiResult<Envelope<CategoryData>> {
    let name = category_name(payload)?;

    let category = state
        .repo
        .create_category(&name)
        .await
        .map_err(write_error("Error creating category"))?;

    tracing::info!(admin_id = %admin.id, category_id = %category.id, "category created");
    Ok(Envelope::created(
        CategoryData { category },
        "Category created successfully",
    ))
}

/// update_category
///
/// [Admin Route] Renames a category.
#[utoipa::path(
    put,
    path = "/api/categories/{id}",
    request_body = CategoryRequest,
    params(("id" = Uuid, Path, description = "Category ID")),
    responses(
        (status = 200, description = "Category updated", body = CategoryData),
        (status = 400, description = "Blank or duplicate name"),
        (status = 404, description = "Category not found")
    ),
    tag = "categories"
)]
pub async fn update_category(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<CategoryRequest>,
) -> ApiResult<Envelope<CategoryData>> {
    let name = category_name(payload)?;

    let category = state
        .repo
        .update_category(id, &name)
        .await
        .map_err(write_error("Error updating category"))?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))?;

    tracing::info!(admin_id = %admin.id, category_id = %id, "category renamed");
    Ok(Envelope::ok(
        CategoryData { category },
        "Category updated successfully",
    ))
}

/// delete_category
///
/// [Admin Route] Posts in the category survive with no category.
#[utoipa::path(
    delete,
    path = "/api/categories/{id}",
    params(("id" = Uuid, Path, description = "Category ID")),
    responses(
        (status = 200, description = "Category deleted"),
        (status = 404, description = "Category not found")
    ),
    tag = "categories"
)]
pub async fn delete_category(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Envelope<()>> {
    if !state
        .repo
        .delete_category(id)
        .await
        .map_err(|e| ApiError::internal("Error deleting category", e))?
    {
        return Err(ApiError::not_found(NOT_FOUND));
    }

    tracing::info!(admin_id = %admin.id, category_id = %id, "category deleted");
    Ok(Envelope::message("Category deleted successfully"))
}
