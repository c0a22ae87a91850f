mod common;

use catalog_api::entities::user::{self, Role};
use common::{spawn_app, TestApp, PASSWORD};
use reqwest::StatusCode;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::{json, Value};

async fn register(app: &TestApp, payload: Value) -> reqwest::Response {
    app.client
        .post(app.url("/api/register"))
        .json(&payload)
        .send()
        .await
        .expect("Failed to send register request")
}

async fn stored_user(app: &TestApp, username: &str) -> user::Model {
    user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .one(app.db.as_ref())
        .await
        .expect("Failed to query user")
        .expect("User not stored")
}

#[tokio::test]
async fn registration_needs_activation_before_login() {
    let app = spawn_app().await;

    let response = register(
        &app,
        json!({ "username": "alice", "email": "alice@example.com", "password": PASSWORD }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.json::<Value>().await.unwrap();
    assert_eq!(
        body["message"],
        "Registration successful. Please check your email to activate your account."
    );

    let stored = stored_user(&app, "alice").await;
    assert!(!stored.is_active);
    assert_eq!(stored.role, Role::Agent);

    let login = app
        .client
        .post(app.url("/api/login"))
        .json(&json!({ "username": "alice", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        login.json::<Value>().await.unwrap()["error"],
        "Invalid credentials"
    );

    let mail = app.mailer.last_for("alice").expect("No activation mail sent");
    assert_eq!(mail.to, "alice@example.com");
    let activation = app.client.get(&mail.link).send().await.unwrap();
    assert_eq!(activation.status(), StatusCode::OK);
    assert_eq!(
        activation.json::<Value>().await.unwrap()["message"],
        "Account activated successfully!"
    );
    assert!(stored_user(&app, "alice").await.is_active);

    let body = app.login("alice").await;
    assert!(body["access"].is_string());
    assert!(body["refresh"].is_string());
    assert_eq!(body["role"], "agent");

    // A second visit of the same link changes nothing.
    let again = app.client.get(&mail.link).send().await.unwrap();
    assert_eq!(again.status(), StatusCode::OK);
}

#[tokio::test]
async fn registration_keeps_the_requested_role() {
    let app = spawn_app().await;

    let response = register(
        &app,
        json!({
            "username": "stan",
            "email": "stan@example.com",
            "password": PASSWORD,
            "role": "staff"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(stored_user(&app, "stan").await.role, Role::Staff);
}

#[tokio::test]
async fn tampered_or_foreign_activation_links_are_rejected() {
    let app = spawn_app().await;
    register(
        &app,
        json!({ "username": "bob", "email": "bob@example.com", "password": PASSWORD }),
    )
    .await;
    let link = app.mailer.last_for("bob").unwrap().link;

    let tampered = format!("{}x/", link.trim_end_matches('/'));
    let response = app.client.get(&tampered).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>().await.unwrap()["error"],
        "Activation link expired or invalid"
    );

    let response = app
        .client
        .get(app.url("/api/activate/!!!/token/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>().await.unwrap()["error"],
        "Invalid activation link"
    );

    // Bob's token on another account's uid.
    let carol = app.create_user("carol", Role::Agent, false).await;
    let token = link
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap()
        .to_string();
    let uid = catalog_api::middleware::auth::encode_uid(carol);
    let response = app
        .client
        .get(app.url(&format!("/api/activate/{uid}/{token}/")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(!stored_user(&app, "bob").await.is_active);
    assert!(!stored_user(&app, "carol").await.is_active);
}

#[tokio::test]
async fn registration_reports_field_errors() {
    let app = spawn_app().await;
    app.create_user("taken", Role::Agent, true).await;

    let response = register(
        &app,
        json!({ "username": "taken", "email": "not-an-email", "password": "12345678" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response.json::<Value>().await.unwrap();
    assert_eq!(
        body["username"][0],
        "A user with that username already exists."
    );
    assert_eq!(body["email"][0], "Enter a valid email address.");
    assert!(body["password"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn unknown_role_is_a_field_error() {
    let app = spawn_app().await;

    let response = register(
        &app,
        json!({
            "username": "mallory",
            "email": "mallory@example.com",
            "password": PASSWORD,
            "role": "superuser"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response.json::<Value>().await.unwrap();
    assert_eq!(body["role"][0], "\"superuser\" is not a valid choice.");
    assert!(body.get("error").is_none());
    assert!(app.mailer.last_for("mallory").is_none());
}

#[tokio::test]
async fn refresh_token_issues_a_new_access_token() {
    let app = spawn_app().await;
    app.create_user("rita", Role::Agent, true).await;
    let tokens = app.login("rita").await;

    let response = app
        .client
        .post(app.url("/api/token/refresh"))
        .json(&json!({ "refresh": tokens["refresh"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let access = response.json::<Value>().await.unwrap()["access"]
        .as_str()
        .unwrap()
        .to_string();

    let products = app.get("/api/products/", &access).send().await.unwrap();
    assert_eq!(products.status(), StatusCode::OK);

    // Access tokens are not refresh tokens, and the other way round.
    let response = app
        .client
        .post(app.url("/api/token/refresh"))
        .json(&json!({ "refresh": tokens["access"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let refresh = tokens["refresh"].as_str().unwrap();
    let response = app.get("/api/products/", refresh).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_routes_need_a_token() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(app.url("/api/products/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/api/orders/", "garbage").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let health = app.client.get(app.url("/")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.json::<Value>().await.unwrap()["status"], "ok");
}
