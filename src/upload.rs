use std::path::Path;

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::{StatusCode, header::CONTENT_TYPE},
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::PostRequest,
    storage::{StorageState, sanitize_key, upload_url_prefix},
};

/// Largest accepted image, in bytes (5 MiB).
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const ALLOWED_TYPES: [&str; 4] = ["jpeg", "jpg", "png", "gif"];

const IMAGES_ONLY: &str = "Error: Images only (jpeg, jpg, png, gif)!";
const TOO_LARGE: &str = "File too large, maximum size is 5MB";

/// ImageUpload
///
/// One file part named `image`, fully buffered.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Lower-cased extension including the dot, or empty.
    pub fn extension(&self) -> String {
        extension_of(&self.file_name)
    }

    pub fn validate(&self) -> ApiResult<()> {
        check_image_type(&self.file_name, &self.content_type)?;
        if self.bytes.len() > MAX_IMAGE_BYTES {
            return Err(ApiError::bad_request(TOO_LARGE));
        }
        Ok(())
    }
}

fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// check_image_type
///
/// Both the extension and the declared MIME type must name an allowed image type.
pub fn check_image_type(file_name: &str, content_type: &str) -> ApiResult<()> {
    let ext = extension_of(file_name);
    let ext_ok = ALLOWED_TYPES
        .iter()
        .any(|allowed| ext.strip_prefix('.') == Some(*allowed));
    let mime = content_type.to_ascii_lowercase();
    let mime_ok = ALLOWED_TYPES.iter().any(|allowed| mime.contains(allowed));

    if ext_ok && mime_ok {
        Ok(())
    } else {
        Err(ApiError::bad_request(IMAGES_ONLY))
    }
}

/// object_key
///
/// `<unix-millis>-<32 hex chars><ext>`, at the bucket root.
pub fn object_key(ext: &str) -> String {
    format!(
        "{}-{}{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        ext
    )
}

/// store_image
///
/// Validates and uploads an image, returning its public URL.
pub async fn store_image(storage: &StorageState, image: ImageUpload) -> ApiResult<String> {
    image.validate()?;
    let key = object_key(&image.extension());
    let size = image.bytes.len();

    let url = storage
        .upload_object(&key, image.bytes, &image.content_type)
        .await
        .map_err(|e| ApiError::internal("Error uploading file to storage", e))?;

    tracing::info!(%key, size, "image stored");
    Ok(url)
}

/// discard_image
///
/// Best-effort removal of a stored image. Objects owned by the storage backend
/// are deleted there; `/<upload_dir>/<file>` URLs are removed from disk; any
/// other URL is left alone. Never fails the caller.
pub async fn discard_image(storage: &StorageState, upload_dir: &str, url: &str) {
    if let Some(key) = storage.key_for_url(url) {
        match storage.delete_object(&key).await {
            Ok(()) => tracing::info!(%key, "image deleted from storage"),
            Err(e) => tracing::warn!(%key, "failed to delete image from storage: {e}"),
        }
        return;
    }

    let local_prefix = format!("{}/", upload_url_prefix(upload_dir));
    let Some(file) = url.strip_prefix(&local_prefix) else {
        tracing::debug!(%url, "image not owned by this server, leaving it");
        return;
    };
    let file = sanitize_key(file);
    if file.is_empty() {
        return;
    }

    let path = Path::new(upload_dir).join(&file);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => tracing::info!(path = %path.display(), "local image deleted"),
        Err(e) => tracing::warn!(path = %path.display(), "failed to delete local image: {e}"),
    }
}

/// PostSubmission
///
/// Body of post create/update and of the test upload route. Accepts either a
/// `multipart/form-data` form (text fields plus an optional `image` file) or
/// a JSON `PostRequest`. An empty body yields an empty submission.
#[derive(Debug, Default)]
pub struct PostSubmission {
    pub fields: PostRequest,
    pub image: Option<ImageUpload>,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::bad_request(TOO_LARGE)
    } else {
        ApiError::bad_request(err.body_text())
    }
}

async fn read_multipart(mut multipart: Multipart) -> ApiResult<PostSubmission> {
    let mut submission = PostSubmission::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        match name.as_str() {
            "image" => {
                let file_name = field.file_name().unwrap_or_default().to_owned();
                let content_type = field.content_type().unwrap_or_default().to_owned();
                // A file input left empty still sends a part, with `filename=""`
                // and usually `application/octet-stream`.
                if file_name.is_empty() {
                    field.bytes().await.map_err(multipart_error)?;
                    continue;
                }
                if submission.image.is_some() {
                    return Err(ApiError::bad_request("Only one image can be uploaded"));
                }
                check_image_type(&file_name, &content_type)?;

                let bytes = field.bytes().await.map_err(multipart_error)?;
                let image = ImageUpload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                };
                image.validate()?;
                submission.image = Some(image);
            }
            "title" | "content" | "category_id" | "image_url" => {
                let value = field.text().await.map_err(multipart_error)?;
                let slot = match name.as_str() {
                    "title" => &mut submission.fields.title,
                    "content" => &mut submission.fields.content,
                    "category_id" => &mut submission.fields.category_id,
                    _ => &mut submission.fields.image_url,
                };
                *slot = Some(value);
            }
            other => tracing::debug!(field = other, "ignoring unexpected form field"),
        }
    }

    Ok(submission)
}

impl<S> FromRequest<S> for PostSubmission
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
            return read_multipart(multipart).await;
        }

        let body = Bytes::from_request(req, state).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::bad_request(TOO_LARGE)
            } else {
                ApiError::bad_request(rejection.body_text())
            }
        })?;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let fields = serde_json::from_slice::<PostRequest>(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))?;
        Ok(Self {
            fields,
            image: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::{LocalDiskStorage, MOCK_PUBLIC_URL, MockStorageService};

    fn image(name: &str, mime: &str, size: usize) -> ImageUpload {
        ImageUpload {
            file_name: name.into(),
            content_type: mime.into(),
            bytes: vec![0u8; size],
        }
    }

    #[test]
    fn accepts_allowed_image_types() {
        assert!(image("cat.png", "image/png", 10).validate().is_ok());
        assert!(image("CAT.JPG", "image/jpeg", 10).validate().is_ok());
        assert!(image("anim.gif", "image/gif", 10).validate().is_ok());
    }

    #[test]
    fn rejects_mismatched_extension_or_mime() {
        let err = image("notes.txt", "image/png", 10).validate().unwrap_err();
        assert_eq!(err.to_string(), IMAGES_ONLY);
        assert!(image("cat.png", "text/plain", 10).validate().is_err());
        assert!(image("noext", "image/png", 10).validate().is_err());
    }

    #[test]
    fn rejects_oversized_image() {
        let err = image("big.png", "image/png", MAX_IMAGE_BYTES + 1)
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), TOO_LARGE);
        assert!(image("edge.png", "image/png", MAX_IMAGE_BYTES).validate().is_ok());
    }

    #[test]
    fn object_key_has_millis_hex_and_extension() {
        let key = object_key(".png");
        let (millis, rest) = key.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        let hex = rest.strip_suffix(".png").unwrap();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn store_then_discard_uses_the_same_key() {
        let mock = MockStorageService::new();
        let storage: StorageState = Arc::new(mock.clone());

        let url = store_image(&storage, image("a.png", "image/png", 4)).await.unwrap();
        assert!(url.starts_with(MOCK_PUBLIC_URL));

        discard_image(&storage, "uploads", &url).await;
        assert_eq!(mock.uploaded_keys(), mock.deleted_keys());
    }

    #[tokio::test]
    async fn discard_ignores_foreign_urls() {
        let mock = MockStorageService::new();
        let storage: StorageState = Arc::new(mock.clone());

        discard_image(&storage, "uploads", "https://cdn.example.com/x.png").await;
        assert!(mock.deleted_keys().is_empty());
    }

    #[tokio::test]
    async fn discard_removes_local_upload_file() {
        let dir = std::env::temp_dir().join(format!("blog-api-discard-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let file = dir.join("old.png");
        tokio::fs::write(&file, b"x").await.unwrap();

        // Storage backend owns a different prefix, so the local path branch runs.
        let storage: StorageState = Arc::new(LocalDiskStorage::new("elsewhere"));
        let dir_str = dir.to_string_lossy().to_string();
        discard_image(&storage, &dir_str, &format!("/{}/old.png", dir_str.trim_matches('/'))).await;

        assert!(!file.exists());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
