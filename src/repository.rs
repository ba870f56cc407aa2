use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, query_builder::QueryBuilder};
use uuid::Uuid;

use crate::models::{
    Category, NewPost, NewUser, Post, PostChanges, PostQuery, PostRow, Role, Status, User,
};

/// RepositoryError
///
/// Store failures, classified so handlers can turn constraint violations into 400s.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return RepositoryError::UniqueViolation(db_err.message().to_string());
            }
            if db_err.is_foreign_key_violation() {
                return RepositoryError::ForeignKeyViolation(db_err.message().to_string());
            }
        }
        RepositoryError::Database(err)
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Repository Trait
///
/// The abstract contract for every persistence operation against the managed store.
/// Handlers only see `Arc<dyn Repository>`, so tests swap in `MemoryRepository`.
///
/// **Send + Sync + async_trait** make the trait object shareable across Axum's tasks.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn create_user(&self, user: NewUser) -> RepoResult<User>;
    // Partial update; `None` fields keep their value. Returns None for an unknown id.
    async fn update_profile(
        &self,
        id: Uuid,
        name: Option<String>,
        email: Option<String>,
    ) -> RepoResult<Option<User>>;
    // Newest first.
    async fn list_users(&self) -> RepoResult<Vec<User>>;
    async fn set_user_status(&self, id: Uuid, status: Status) -> RepoResult<Option<User>>;
    async fn set_user_role(&self, id: Uuid, role: Role) -> RepoResult<Option<User>>;

    // --- Categories ---
    // Ordered by name.
    async fn list_categories(&self) -> RepoResult<Vec<Category>>;
    async fn get_category(&self, id: Uuid) -> RepoResult<Option<Category>>;
    async fn create_category(&self, name: &str) -> RepoResult<Category>;
    async fn update_category(&self, id: Uuid, name: &str) -> RepoResult<Option<Category>>;
    // Returns true if a row was deleted.
    async fn delete_category(&self, id: Uuid) -> RepoResult<bool>;

    // --- Posts ---
    // One page of posts matching the filters, newest first, plus the total match count.
    async fn list_posts(&self, query: PostQuery) -> RepoResult<(Vec<Post>, i64)>;
    async fn get_post(&self, id: Uuid) -> RepoResult<Option<Post>>;
    async fn create_post(&self, post: NewPost) -> RepoResult<Post>;
    async fn update_post(&self, id: Uuid, changes: PostChanges) -> RepoResult<Option<Post>>;
    async fn delete_post(&self, id: Uuid) -> RepoResult<bool>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

const USER_COLUMNS: &str =
    "id, name, email, password, role, status, created_at, updated_at";

const POST_SELECT: &str = r#"
    SELECT
        p.id, p.title, p.content, p.image_url, p.category_id, p.user_id,
        p.created_at, p.updated_at,
        c.name AS category_name,
        u.name AS author_name
"#;

/// PostgresRepository
///
/// The `Repository` backed by the hosted Postgres instance.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends the listing filters shared by the page query and the count query.
    fn push_post_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &PostQuery) {
        builder.push(" WHERE 1 = 1");
        if let Some(category_id) = query.category_id {
            builder.push(" AND p.category_id = ");
            builder.push_bind(category_id);
        }
        if let Some(search) = &query.search {
            let pattern = format!("%{}%", escape_like(search));
            builder.push(" AND (p.title ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR p.content ILIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }
    }
}

/// Escapes `%`, `_` and `\` so a search term matches literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// get_user_by_email
    ///
    /// Emails are compared case-insensitively; the unique index is on `lower(email)`.
    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"INSERT INTO users (id, name, email, password, role, status, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
               RETURNING {USER_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.status)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    /// update_profile
    ///
    /// Uses `COALESCE` so only the provided fields are written.
    async fn update_profile(
        &self,
        id: Uuid,
        name: Option<String>,
        email: Option<String>,
    ) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"UPDATE users
               SET name = COALESCE($2, name),
                   email = COALESCE($3, email),
                   updated_at = NOW()
               WHERE id = $1
               RETURNING {USER_COLUMNS}"#
        ))
        .bind(id)
        .bind(name)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn set_user_status(&self, id: Uuid, status: Status) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn list_categories(&self) -> RepoResult<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(
            "SELECT id, name, created_at FROM categories ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    async fn get_category(&self, id: Uuid) -> RepoResult<Option<Category>> {
        let category = sqlx::query_as::<_, Category>(
            "SELECT id, name, created_at FROM categories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(category)
    }

    async fn create_category(&self, name: &str) -> RepoResult<Category> {
        let category = sqlx::query_as::<_, Category>(
            "INSERT INTO categories (id, name, created_at) VALUES ($1, $2, NOW()) RETURNING id, name, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(category)
    }

    async fn update_category(&self, id: Uuid, name: &str) -> RepoResult<Option<Category>> {
        let category = sqlx::query_as::<_, Category>(
            "UPDATE categories SET name = $2 WHERE id = $1 RETURNING id, name, created_at",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(category)
    }

    async fn delete_category(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// list_posts
    ///
    /// Builds the filtered page and count queries with `QueryBuilder` so every
    /// user-supplied value is bound, never interpolated.
    async fn list_posts(&self, query: PostQuery) -> RepoResult<(Vec<Post>, i64)> {
        let mut count: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM posts p");
        Self::push_post_filters(&mut count, &query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut page: QueryBuilder<Postgres> = QueryBuilder::new(POST_SELECT);
        page.push(
            " FROM posts p LEFT JOIN categories c ON c.id = p.category_id LEFT JOIN users u ON u.id = p.user_id",
        );
        Self::push_post_filters(&mut page, &query);
        page.push(" ORDER BY p.created_at DESC, p.id DESC LIMIT ");
        page.push_bind(query.limit);
        page.push(" OFFSET ");
        page.push_bind(query.offset);

        let rows = page
            .build_query_as::<PostRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok((rows.into_iter().map(Post::from).collect(), total))
    }

    async fn get_post(&self, id: Uuid) -> RepoResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            r#"{POST_SELECT}
               FROM posts p
               LEFT JOIN categories c ON c.id = p.category_id
               LEFT JOIN users u ON u.id = p.user_id
               WHERE p.id = $1"#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Post::from))
    }

    /// create_post
    ///
    /// Uses a CTE to insert and join the category/author in a single round trip.
    async fn create_post(&self, post: NewPost) -> RepoResult<Post> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            r#"WITH p AS (
                   INSERT INTO posts (id, title, content, image_url, category_id, user_id, created_at, updated_at)
                   VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
                   RETURNING *
               )
               {POST_SELECT}
               FROM p
               LEFT JOIN categories c ON c.id = p.category_id
               LEFT JOIN users u ON u.id = p.user_id"#
        ))
        .bind(Uuid::new_v4())
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.image_url)
        .bind(post.category_id)
        .bind(post.user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    /// update_post
    ///
    /// `COALESCE` keeps unchanged columns; the CTE returns the joined view.
    async fn update_post(&self, id: Uuid, changes: PostChanges) -> RepoResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            r#"WITH p AS (
                   UPDATE posts
                   SET title = COALESCE($2, title),
                       content = COALESCE($3, content),
                       category_id = COALESCE($4, category_id),
                       image_url = COALESCE($5, image_url),
                       updated_at = NOW()
                   WHERE id = $1
                   RETURNING *
               )
               {POST_SELECT}
               FROM p
               LEFT JOIN categories c ON c.id = p.category_id
               LEFT JOIN users u ON u.id = p.user_id"#
        ))
        .bind(id)
        .bind(changes.title)
        .bind(changes.content)
        .bind(changes.category_id)
        .bind(changes.image_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Post::from))
    }

    async fn delete_post(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// --- In-memory implementation (tests and local experiments) ---

#[derive(Default)]
struct MemoryTables {
    users: HashMap<Uuid, User>,
    categories: HashMap<Uuid, Category>,
    posts: HashMap<Uuid, StoredPost>,
}

#[derive(Clone)]
struct StoredPost {
    id: Uuid,
    title: String,
    content: String,
    image_url: Option<String>,
    category_id: Option<Uuid>,
    user_id: Uuid,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl MemoryTables {
    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(email) && Some(u.id) != except)
    }

    fn name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.categories
            .values()
            .any(|c| c.name == name && Some(c.id) != except)
    }

    fn view(&self, stored: &StoredPost) -> Post {
        PostRow {
            id: stored.id,
            title: stored.title.clone(),
            content: stored.content.clone(),
            image_url: stored.image_url.clone(),
            category_id: stored.category_id,
            user_id: stored.user_id,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
            category_name: stored
                .category_id
                .and_then(|id| self.categories.get(&id))
                .map(|c| c.name.clone()),
            author_name: self.users.get(&stored.user_id).map(|u| u.name.clone()),
        }
        .into()
    }
}

/// MemoryRepository
///
/// A `Repository` held entirely in memory, enforcing the same uniqueness and
/// foreign key rules as the Postgres schema. Used by the integration tests.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    tables: Arc<RwLock<MemoryTables>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryTables> {
        self.tables.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryTables> {
        self.tables.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.read().users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        Ok(self
            .read()
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let mut tables = self.write();
        if tables.email_taken(&user.email, None) {
            return Err(RepositoryError::UniqueViolation("users_email_key".into()));
        }
        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            status: user.status,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        name: Option<String>,
        email: Option<String>,
    ) -> RepoResult<Option<User>> {
        let mut tables = self.write();
        if let Some(email) = &email {
            if tables.email_taken(email, Some(id)) {
                return Err(RepositoryError::UniqueViolation("users_email_key".into()));
            }
        }
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = name {
            user.name = name;
        }
        if let Some(email) = email {
            user.email = email;
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        let mut users: Vec<User> = self.read().users.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(users)
    }

    async fn set_user_status(&self, id: Uuid, status: Status) -> RepoResult<Option<User>> {
        let mut tables = self.write();
        Ok(tables.users.get_mut(&id).map(|user| {
            user.status = status;
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> RepoResult<Option<User>> {
        let mut tables = self.write();
        Ok(tables.users.get_mut(&id).map(|user| {
            user.role = role;
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn list_categories(&self) -> RepoResult<Vec<Category>> {
        let mut categories: Vec<Category> = self.read().categories.values().cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn get_category(&self, id: Uuid) -> RepoResult<Option<Category>> {
        Ok(self.read().categories.get(&id).cloned())
    }

    async fn create_category(&self, name: &str) -> RepoResult<Category> {
        let mut tables = self.write();
        if tables.name_taken(name, None) {
            return Err(RepositoryError::UniqueViolation("categories_name_key".into()));
        }
        let category = Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        tables.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn update_category(&self, id: Uuid, name: &str) -> RepoResult<Option<Category>> {
        let mut tables = self.write();
        if tables.name_taken(name, Some(id)) {
            return Err(RepositoryError::UniqueViolation("categories_name_key".into()));
        }
        Ok(tables.categories.get_mut(&id).map(|category| {
            category.name = name.to_string();
            category.clone()
        }))
    }

    async fn delete_category(&self, id: Uuid) -> RepoResult<bool> {
        let mut tables = self.write();
        let removed = tables.categories.remove(&id).is_some();
        if removed {
            // ON DELETE SET NULL
            for post in tables.posts.values_mut() {
                if post.category_id == Some(id) {
                    post.category_id = None;
                }
            }
        }
        Ok(removed)
    }

    async fn list_posts(&self, query: PostQuery) -> RepoResult<(Vec<Post>, i64)> {
        let tables = self.read();
        let needle = query.search.as_deref().map(str::to_lowercase);
        let mut matching: Vec<&StoredPost> = tables
            .posts
            .values()
            .filter(|p| query.category_id.is_none() || p.category_id == query.category_id)
            .filter(|p| match &needle {
                Some(needle) => {
                    p.title.to_lowercase().contains(needle)
                        || p.content.to_lowercase().contains(needle)
                }
                None => true,
            })
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let posts = matching
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .map(|p| tables.view(p))
            .collect();
        Ok((posts, total))
    }

    async fn get_post(&self, id: Uuid) -> RepoResult<Option<Post>> {
        let tables = self.read();
        Ok(tables.posts.get(&id).map(|p| tables.view(p)))
    }

    async fn create_post(&self, post: NewPost) -> RepoResult<Post> {
        let mut tables = self.write();
        if let Some(category_id) = post.category_id {
            if !tables.categories.contains_key(&category_id) {
                return Err(RepositoryError::ForeignKeyViolation("posts_category_id_fkey".into()));
            }
        }
        if !tables.users.contains_key(&post.user_id) {
            return Err(RepositoryError::ForeignKeyViolation("posts_user_id_fkey".into()));
        }
        let now = Utc::now();
        let stored = StoredPost {
            id: Uuid::new_v4(),
            title: post.title,
            content: post.content,
            image_url: post.image_url,
            category_id: post.category_id,
            user_id: post.user_id,
            created_at: now,
            updated_at: now,
        };
        tables.posts.insert(stored.id, stored.clone());
        Ok(tables.view(&stored))
    }

    async fn update_post(&self, id: Uuid, changes: PostChanges) -> RepoResult<Option<Post>> {
        let mut tables = self.write();
        if let Some(category_id) = changes.category_id {
            if !tables.categories.contains_key(&category_id) {
                return Err(RepositoryError::ForeignKeyViolation("posts_category_id_fkey".into()));
            }
        }
        let Some(stored) = tables.posts.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = changes.title {
            stored.title = title;
        }
        if let Some(content) = changes.content {
            stored.content = content;
        }
        if changes.category_id.is_some() {
            stored.category_id = changes.category_id;
        }
        if changes.image_url.is_some() {
            stored.image_url = changes.image_url;
        }
        stored.updated_at = Utc::now();
        let stored = stored.clone();
        Ok(Some(tables.view(&stored)))
    }

    async fn delete_post(&self, id: Uuid) -> RepoResult<bool> {
        Ok(self.write().posts.remove(&id).is_some())
    }
}
