//! Runs against a real Postgres. Opt in with
//! `DATABASE_URL=... cargo test -- --ignored`.

use blog_api::{
    models::{NewPost, NewUser, PostChanges, PostQuery, Role, Status, User},
    repository::{PostgresRepository, Repository, RepositoryError},
};
use sqlx::PgPool;
use uuid::Uuid;

// --- Test Context and Setup ---

struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    async fn setup() -> Self {
        dotenv::dotenv().ok();

        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set to run integration tests");

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        DbTestContext { pool }
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

// --- Test Data Helpers ---

/// Every run uses fresh emails and names so the tests can share one database.
fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

async fn create_test_user(repo: &PostgresRepository, role: Role, status: Status) -> User {
    repo.create_user(NewUser {
        name: unique("user"),
        email: format!("{}@Test.com", unique("user")),
        password_hash: "$2b$04$not-a-real-hash".into(),
        role,
        status,
    })
    .await
    .expect("Failed to create test user")
}

// --- Users ---

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_user_email_is_unique_ignoring_case() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, Role::User, Status::Pending).await;

    let found = repo
        .get_user_by_email(&user.email.to_uppercase())
        .await
        .unwrap()
        .expect("lookup should ignore case");
    assert_eq!(found.id, user.id);

    let duplicate = repo
        .create_user(NewUser {
            name: "Twin".into(),
            email: user.email.to_lowercase(),
            password_hash: "x".into(),
            role: Role::User,
            status: Status::Pending,
        })
        .await;
    assert!(matches!(duplicate, Err(RepositoryError::UniqueViolation(_))));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_user_status_and_role_updates() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, Role::User, Status::Pending).await;

    let approved = repo
        .set_user_status(user.id, Status::Approved)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(approved.status, Status::Approved);
    assert!(approved.updated_at >= user.updated_at);

    let promoted = repo.set_user_role(user.id, Role::Admin).await.unwrap().unwrap();
    assert_eq!(promoted.role, Role::Admin);

    assert!(
        repo.set_user_status(Uuid::new_v4(), Status::Rejected)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_update_profile_keeps_unset_fields() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, Role::User, Status::Approved).await;

    let updated = repo
        .update_profile(user.id, Some("New Name".into()), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.name, "New Name");
    assert_eq!(updated.email, user.email);
}

// --- Categories ---

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_category_name_is_unique() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let name = unique("cat");

    let category = repo.create_category(&name).await.unwrap();
    assert_eq!(category.name, name);

    let duplicate = repo.create_category(&name).await;
    assert!(matches!(duplicate, Err(RepositoryError::UniqueViolation(_))));

    assert!(repo.delete_category(category.id).await.unwrap());
    assert!(!repo.delete_category(category.id).await.unwrap());
}

// --- Posts ---

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_post_lifecycle_with_joins() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let author = create_test_user(&repo, Role::User, Status::Approved).await;
    let category = repo.create_category(&unique("cat")).await.unwrap();

    let post = repo
        .create_post(NewPost {
            title: "Joined".into(),
            content: "Body".into(),
            image_url: None,
            category_id: Some(category.id),
            user_id: author.id,
        })
        .await
        .unwrap();
    assert_eq!(post.categories.as_ref().unwrap().name, category.name);
    assert_eq!(post.users.as_ref().unwrap().name, author.name);

    let updated = repo
        .update_post(
            post.id,
            PostChanges {
                title: Some("Renamed".into()),
                image_url: Some("https://cdn.example.com/x.png".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.content, "Body");
    assert_eq!(updated.category_id, Some(category.id));

    // ON DELETE SET NULL
    repo.delete_category(category.id).await.unwrap();
    let orphan = repo.get_post(post.id).await.unwrap().unwrap();
    assert!(orphan.category_id.is_none());
    assert!(orphan.categories.is_none());

    assert!(repo.delete_post(post.id).await.unwrap());
    assert!(repo.get_post(post.id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_post_with_unknown_category_is_rejected() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let author = create_test_user(&repo, Role::User, Status::Approved).await;

    let result = repo
        .create_post(NewPost {
            title: "T".into(),
            content: "C".into(),
            image_url: None,
            category_id: Some(Uuid::new_v4()),
            user_id: author.id,
        })
        .await;
    assert!(matches!(result, Err(RepositoryError::ForeignKeyViolation(_))));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_list_posts_filters_and_counts() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let author = create_test_user(&repo, Role::User, Status::Approved).await;
    let category = repo.create_category(&unique("cat")).await.unwrap();
    let marker = unique("needle");

    for i in 0..3 {
        repo.create_post(NewPost {
            title: format!("{marker} {i}"),
            content: "Body".into(),
            image_url: None,
            category_id: (i < 2).then_some(category.id),
            user_id: author.id,
        })
        .await
        .unwrap();
    }

    let (posts, total) = repo
        .list_posts(PostQuery {
            category_id: None,
            search: Some(marker.to_uppercase()),
            limit: 2,
            offset: 0,
        })
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(posts.len(), 2);
    assert!(posts[0].created_at >= posts[1].created_at);

    let (_, total) = repo
        .list_posts(PostQuery {
            category_id: Some(category.id),
            search: Some(marker.clone()),
            limit: 10,
            offset: 0,
        })
        .await
        .unwrap();
    assert_eq!(total, 2);

    // Deleting the author cascades to their posts.
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(author.id)
        .execute(&ctx.pool)
        .await
        .unwrap();
    let (_, total) = repo
        .list_posts(PostQuery {
            category_id: None,
            search: Some(marker),
            limit: 10,
            offset: 0,
        })
        .await
        .unwrap();
    assert_eq!(total, 0);
}
