use axum::extract::State;
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiPath, ApiQuery, non_blank};
use crate::{
    AppState,
    auth::AuthUser,
    envelope::Envelope,
    error::{ApiError, ApiResult},
    models::{
        ImageUploadData, NewPost, Pagination, Post, PostChanges, PostData, PostQuery, PostRequest,
        PostsData,
    },
    repository::RepositoryError,
    upload::{PostSubmission, discard_image, store_image},
};

const DEFAULT_PAGE: i64 = 1;
const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 100;

const POST_NOT_FOUND: &str = "Post not found";
const UNKNOWN_CATEGORY: &str = "Selected category does not exist";

/// PostFilter
///
/// Query parameters of `GET /api/posts`. Kept as raw strings: a non-numeric
/// `page` or `limit` falls back to the default instead of failing the request.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct PostFilter {
    /// Page number, starting at 1.
    pub page: Option<String>,
    /// Page size, at most 100.
    pub limit: Option<String>,
    /// Category id to filter by.
    pub category: Option<String>,
    /// Case-insensitive substring of title or content.
    pub search: Option<String>,
}

impl PostFilter {
    /// Resolves the filter into (page, limit, query).
    fn resolve(self) -> ApiResult<(i64, i64, PostQuery)> {
        let page = self
            .page
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(DEFAULT_PAGE);
        let limit = self
            .limit
            .and_then(|l| l.trim().parse::<i64>().ok())
            .filter(|l| *l >= 1)
            .map(|l| l.min(MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);
        let category_id = non_blank(self.category)
            .map(|c| Uuid::parse_str(&c))
            .transpose()
            .map_err(|_| ApiError::bad_request("Invalid category id"))?;

        let query = PostQuery {
            category_id,
            search: non_blank(self.search),
            limit,
            offset: (page - 1).saturating_mul(limit),
        };
        Ok((page, limit, query))
    }
}

/// Checks that a submitted category id names an existing category.
async fn resolve_category(state: &AppState, raw: Option<String>) -> ApiResult<Option<Uuid>> {
    let Some(raw) = non_blank(raw) else {
        return Ok(None);
    };
    let id = Uuid::parse_str(&raw).map_err(|_| ApiError::bad_request(UNKNOWN_CATEGORY))?;
    match state.repo.get_category(id).await? {
        Some(_) => Ok(Some(id)),
        None => Err(ApiError::bad_request(UNKNOWN_CATEGORY)),
    }
}

fn ensure_can_modify(user: &AuthUser, post: &Post, message: &'static str) -> ApiResult<()> {
    if post.user_id == user.id || user.is_admin() {
        Ok(())
    } else {
        tracing::info!(user_id = %user.id, post_id = %post.id, "post modification denied");
        Err(ApiError::forbidden(message))
    }
}

fn write_error(context: &'static str) -> impl Fn(RepositoryError) -> ApiError {
    move |e| match e {
        RepositoryError::ForeignKeyViolation(_) => ApiError::bad_request(UNKNOWN_CATEGORY),
        other => ApiError::internal(context, other),
    }
}

/// list_posts
///
/// [Public Route] One page of posts, newest first, with pagination metadata.
#[utoipa::path(
    get,
    path = "/api/posts",
    params(PostFilter),
    responses(
        (status = 200, description = "Posts", body = PostsData),
        (status = 400, description = "Invalid category id")
    ),
    tag = "posts"
)]
pub async fn list_posts(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<PostFilter>,
) -> ApiResult<Envelope<PostsData>> {
    let (page, limit, query) = filter.resolve()?;

    let (posts, total) = state
        .repo
        .list_posts(query)
        .await
        .map_err(|e| ApiError::internal("Error fetching posts", e))?;

    Ok(Envelope::ok(
        PostsData {
            posts,
            pagination: Pagination::new(total, page, limit),
        },
        "Posts fetched successfully",
    ))
}

/// get_post
#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    params(("id" = Uuid, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Post", body = PostData),
        (status = 404, description = "Post not found")
    ),
    tag = "posts"
)]
pub async fn get_post(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Envelope<PostData>> {
    let post = state
        .repo
        .get_post(id)
        .await?
        .ok_or_else(|| ApiError::not_found(POST_NOT_FOUND))?;

    Ok(Envelope::ok(PostData { post }, "Post fetched successfully"))
}

/// create_post
///
/// [Authenticated Route] Accepts multipart (with an optional `image` file) or
/// JSON. An uploaded file takes precedence over `image_url`. If the insert
/// fails after an upload, the uploaded object is discarded.
#[utoipa::path(
    post,
    path = "/api/posts",
    request_body(content = PostRequest, description = "JSON, or multipart/form-data with an `image` file part"),
    responses(
        (status = 201, description = "Post created", body = PostData),
        (status = 400, description = "Missing fields, unknown category or invalid image"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "posts"
)]
pub async fn create_post(
    user: AuthUser,
    State(state): State<AppState>,
    submission: PostSubmission,
) -> ApiResult<Envelope<PostData>> {
    let PostSubmission { fields, image } = submission;

    let (Some(title), Some(content)) = (non_blank(fields.title), non_blank(fields.content)) else {
        return Err(ApiError::bad_request("Please provide title and content"));
    };
    let category_id = resolve_category(&state, fields.category_id).await?;

    let uploaded = match image {
        Some(image) => Some(store_image(&state.storage, image).await?),
        None => None,
    };
    let image_url = uploaded.clone().or_else(|| non_blank(fields.image_url));

    let result = state
        .repo
        .create_post(NewPost {
            title,
            content,
            image_url,
            category_id,
            user_id: user.id,
        })
        .await;

    let post = match result {
        Ok(post) => post,
        Err(e) => {
            if let Some(url) = &uploaded {
                discard_image(&state.storage, &state.config.upload_dir, url).await;
            }
            return Err(write_error("Error creating post")(e));
        }
    };

    tracing::info!(user_id = %user.id, post_id = %post.id, "post created");
    Ok(Envelope::created(PostData { post }, "Post created successfully"))
}

/// update_post
///
/// [Authenticated Route] Owner or admin only. A new image, uploaded or given
/// as a different `image_url`, replaces the old one, which is then discarded.
#[utoipa::path(
    put,
    path = "/api/posts/{id}",
    request_body(content = PostRequest, description = "JSON, or multipart/form-data with an `image` file part"),
    params(("id" = Uuid, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Post updated", body = PostData),
        (status = 400, description = "Nothing to update or unknown category"),
        (status = 403, description = "Neither owner nor admin"),
        (status = 404, description = "Post not found")
    ),
    tag = "posts"
)]
pub async fn update_post(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    submission: PostSubmission,
) -> ApiResult<Envelope<PostData>> {
    let PostSubmission { fields, image } = submission;
    let title = non_blank(fields.title);
    let content = non_blank(fields.content);
    let raw_category = non_blank(fields.category_id);
    let image_url = non_blank(fields.image_url);

    if title.is_none()
        && content.is_none()
        && raw_category.is_none()
        && image_url.is_none()
        && image.is_none()
    {
        return Err(ApiError::bad_request(
            "Please provide at least one field to update",
        ));
    }

    let existing = state
        .repo
        .get_post(id)
        .await?
        .ok_or_else(|| ApiError::not_found(POST_NOT_FOUND))?;
    ensure_can_modify(&user, &existing, "Not authorized to update this post")?;

    let category_id = resolve_category(&state, raw_category).await?;

    let uploaded = match image {
        Some(image) => Some(store_image(&state.storage, image).await?),
        None => None,
    };
    let new_image = uploaded
        .clone()
        .or_else(|| image_url.filter(|url| existing.image_url.as_deref() != Some(url.as_str())));

    let result = state
        .repo
        .update_post(
            id,
            PostChanges {
                title,
                content,
                category_id,
                image_url: new_image.clone(),
            },
        )
        .await;

    let updated = match result {
        Ok(updated) => updated,
        Err(e) => {
            if let Some(url) = &uploaded {
                discard_image(&state.storage, &state.config.upload_dir, url).await;
            }
            return Err(write_error("Error updating post")(e));
        }
    };
    let Some(post) = updated else {
        return Err(ApiError::not_found(POST_NOT_FOUND));
    };

    if let (Some(_), Some(old)) = (&new_image, &existing.image_url) {
        discard_image(&state.storage, &state.config.upload_dir, old).await;
    }

    tracing::info!(user_id = %user.id, post_id = %id, "post updated");
    Ok(Envelope::ok(PostData { post }, "Post updated successfully"))
}

/// delete_post
///
/// [Authenticated Route] Owner or admin only. The post's image is discarded.
#[utoipa::path(
    delete,
    path = "/api/posts/{id}",
    params(("id" = Uuid, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Post deleted"),
        (status = 403, description = "Neither owner nor admin"),
        (status = 404, description = "Post not found")
    ),
    tag = "posts"
)]
pub async fn delete_post(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Envelope<()>> {
    let existing = state
        .repo
        .get_post(id)
        .await?
        .ok_or_else(|| ApiError::not_found(POST_NOT_FOUND))?;
    ensure_can_modify(&user, &existing, "Not authorized to delete this post")?;

    if !state
        .repo
        .delete_post(id)
        .await
        .map_err(|e| ApiError::internal("Error deleting post", e))?
    {
        return Err(ApiError::not_found(POST_NOT_FOUND));
    }

    if let Some(url) = &existing.image_url {
        discard_image(&state.storage, &state.config.upload_dir, url).await;
    }

    tracing::info!(user_id = %user.id, post_id = %id, "post deleted");
    Ok(Envelope::message("Post deleted successfully"))
}

/// test_upload
///
/// [Local Route] Stores an image without creating a post, to check the
/// storage wiring. Only mounted in `Env::Local`.
#[utoipa::path(
    post,
    path = "/api/posts/test-upload",
    request_body(content = String, description = "multipart/form-data with an `image` file part", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Image uploaded", body = ImageUploadData),
        (status = 400, description = "No image or invalid image")
    ),
    tag = "posts"
)]
pub async fn test_upload(
    State(state): State<AppState>,
    submission: PostSubmission,
) -> ApiResult<Envelope<ImageUploadData>> {
    let image = submission
        .image
        .ok_or_else(|| ApiError::bad_request("No image uploaded"))?;

    let image_url = store_image(&state.storage, image).await?;
    Ok(Envelope::ok(
        ImageUploadData { image_url },
        "Image uploaded successfully",
    ))
}
