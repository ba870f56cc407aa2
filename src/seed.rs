use crate::{
    auth::hash_password,
    config::AppConfig,
    models::{NewUser, Role, Status},
    repository::RepositoryState,
};

/// Categories created on first start.
pub const DEFAULT_CATEGORIES: [&str; 5] = ["Technology", "Business", "Health", "Lifestyle", "Travel"];

/// seed_defaults
///
/// Startup bootstrap, run after migrations:
/// 1. The configured administrator (`ADMIN_EMAIL` / `ADMIN_PASSWORD`), created
///    approved if no account has that email yet. Nothing is created when unset.
/// 2. The default categories, only if the table is empty.
///
/// Failures are logged and never stop the server.
pub async fn seed_defaults(repo: &RepositoryState, config: &AppConfig) {
    if let Some(seed) = &config.admin_seed {
        seed_admin(repo, config, &seed.name, &seed.email, &seed.password).await;
    } else {
        tracing::debug!("ADMIN_EMAIL/ADMIN_PASSWORD not set, skipping admin seed");
    }
    seed_categories(repo).await;
}

async fn seed_admin(repo: &RepositoryState, config: &AppConfig, name: &str, email: &str, password: &str) {
    let email = email.trim().to_lowercase();
    match repo.get_user_by_email(&email).await {
        Ok(Some(_)) => {
            tracing::debug!(%email, "admin account already present");
            return;
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(%email, "could not check for admin account: {e}");
            return;
        }
    }

    let password_hash = match hash_password(password.to_string(), config.bcrypt_cost).await {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!("could not hash admin password: {e}");
            return;
        }
    };

    let new_admin = NewUser {
        name: name.to_string(),
        email: email.clone(),
        password_hash,
        role: Role::Admin,
        status: Status::Approved,
    };
    match repo.create_user(new_admin).await {
        Ok(user) => tracing::info!(user_id = %user.id, %email, "admin account created"),
        Err(e) => tracing::error!(%email, "could not create admin account: {e}"),
    }
}

async fn seed_categories(repo: &RepositoryState) {
    match repo.list_categories().await {
        Ok(existing) if !existing.is_empty() => return,
        Ok(_) => {}
        Err(e) => {
            tracing::error!("could not list categories: {e}");
            return;
        }
    }

    for name in DEFAULT_CATEGORIES {
        if let Err(e) = repo.create_category(name).await {
            tracing::warn!(category = name, "could not create default category: {e}");
        }
    }
    tracing::info!(count = DEFAULT_CATEGORIES.len(), "default categories seeded");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{config::AdminSeed, repository::MemoryRepository};

    fn config_with_admin(email: &str) -> AppConfig {
        AppConfig {
            admin_seed: Some(AdminSeed {
                name: "Admin User".into(),
                email: email.into(),
                password: "admin-pass".into(),
            }),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn seeds_admin_and_categories_once() {
        let repo: RepositoryState = Arc::new(MemoryRepository::new());
        let config = config_with_admin(" Admin@Blog.Test ");

        seed_defaults(&repo, &config).await;
        seed_defaults(&repo, &config).await;

        let users = repo.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].email, "admin@blog.test");
        assert_eq!(users[0].role, Role::Admin);
        assert_eq!(users[0].status, Status::Approved);

        let categories = repo.list_categories().await.unwrap();
        assert_eq!(categories.len(), DEFAULT_CATEGORIES.len());
    }

    #[tokio::test]
    async fn existing_categories_are_left_alone() {
        let repo: RepositoryState = Arc::new(MemoryRepository::new());
        repo.create_category("Rust").await.unwrap();

        seed_defaults(&repo, &AppConfig::default()).await;

        let categories = repo.list_categories().await.unwrap();
        assert_eq!(categories.len(), 1);
        assert!(repo.list_users().await.unwrap().is_empty());
    }
}
