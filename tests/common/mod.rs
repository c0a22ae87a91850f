#![allow(dead_code)]

use std::sync::Arc;

use catalog_api::{
    api::{create_api_router, AppState},
    config::Config,
    entities::{category, connect, product, setup_schema, user},
    jobs::JobQueue,
    mailer::MemoryMailer,
};
use chrono::{Duration, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use uuid::Uuid;

pub const PASSWORD: &str = "Correct-Horse-42";

pub struct TestApp {
    pub base: String,
    pub client: Client,
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<Config>,
    pub mailer: Arc<MemoryMailer>,
}

/// Serves the full router on an ephemeral port over a fresh in-memory database.
pub async fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Failed to read local address");
    let base = format!("http://{addr}");

    let upload_dir = std::env::temp_dir().join(format!("catalog-api-test-{}", Uuid::new_v4()));
    let mut config = Config::for_tests(upload_dir);
    config.public_base_url = base.clone();

    let db = connect(&config.database_url)
        .await
        .expect("Failed to open test database");
    setup_schema(&db).await.expect("Failed to create schema");
    let db = Arc::new(db);

    let jobs = JobQueue::start(
        db.clone(),
        config.job_queue_capacity,
        Duration::seconds(config.job_retention_secs),
    );
    let mailer = Arc::new(MemoryMailer::default());
    let config = Arc::new(config);

    let app = create_api_router(AppState {
        db: db.clone(),
        config: config.clone(),
        mailer: mailer.clone(),
        jobs,
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Test server failed");
    });

    TestApp {
        base,
        client: Client::new(),
        db,
        config,
        mailer,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn get(&self, path: &str, token: &str) -> RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(token)
    }

    pub fn post(&self, path: &str, token: &str) -> RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(token)
    }

    /// Inserts an account directly, skipping registration.
    pub async fn create_user(&self, username: &str, role: user::Role, active: bool) -> i32 {
        user::ActiveModel {
            username: Set(username.to_string()),
            email: Set(format!("{username}@example.com")),
            password: Set(user::hash_password(PASSWORD).expect("Failed to hash password")),
            role: Set(role),
            is_active: Set(active),
            date_joined: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("Failed to insert user")
        .id
    }

    pub async fn login(&self, username: &str) -> Value {
        let response = self
            .client
            .post(self.url("/api/login"))
            .json(&json!({ "username": username, "password": PASSWORD }))
            .send()
            .await
            .expect("Failed to send login request");
        assert_eq!(response.status(), StatusCode::OK);

        response
            .json::<Value>()
            .await
            .expect("Failed to parse login response JSON")
    }

    /// Creates an active account with `role` and returns its id and access token.
    pub async fn user_with_token(&self, username: &str, role: user::Role) -> (i32, String) {
        let id = self.create_user(username, role, true).await;
        let body = self.login(username).await;
        let token = body["access"]
            .as_str()
            .expect("Token not found in login response")
            .to_string();
        (id, token)
    }

    pub async fn create_category(&self, name: &str) -> i32 {
        category::ActiveModel {
            name: Set(name.to_string()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("Failed to insert category")
        .id
    }

    pub async fn create_product(&self, category_id: i32, uploaded_by: i32, price: f64) -> i32 {
        let now = Utc::now();
        product::ActiveModel {
            category_id: Set(category_id),
            title: Set(format!("Product {price}")),
            description: Set("Seeded for tests".to_string()),
            price: Set(price),
            status: Set(product::DEFAULT_STATUS.to_string()),
            uploaded_by: Set(uploaded_by),
            video: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("Failed to insert product")
        .id
    }
}
