use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::Response,
    routing::get,
    Json, Router,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::api::product::discard_video;
use crate::api::validation::{ValidJson, REQUIRED};
use crate::config::Config;
use crate::entities::{
    category::{self, Entity as CategoryEntity},
    product,
};
use crate::middleware::{
    logging::{to_response, ApiError},
    policy::{policy_middleware, Resource},
};

pub fn category_router() -> Router {
    Router::new()
        .route("/categories/", get(get_categories).post(create_category))
        .route(
            "/categories/:id/",
            get(get_category)
                .put(put_category)
                .patch(patch_category)
                .delete(delete_category),
        )
        .route_layer(from_fn_with_state(Resource::Category, policy_middleware))
}

async fn get_categories(
    Extension(db): Extension<Arc<DatabaseConnection>>,
) -> Result<Response, ApiError> {
    let txn = db.begin().await?;
    let categories = CategoryEntity::find()
        .order_by_asc(category::Column::Id)
        .all(&txn)
        .await?;

    Ok(to_response((StatusCode::OK, Json(categories)), Ok(())))
}

async fn get_category(
    Path(id): Path<i32>,
    Extension(db): Extension<Arc<DatabaseConnection>>,
) -> Result<Response, ApiError> {
    let txn = db.begin().await?;
    let category = find_category(&txn, id).await?;

    Ok(to_response((StatusCode::OK, Json(category)), Ok(())))
}

async fn create_category(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    ValidJson(payload): ValidJson<CategoryPayload>,
) -> Result<Response, ApiError> {
    let name = payload.name.ok_or_else(|| ApiError::field("name", REQUIRED))?;

    let txn = db.begin().await?;
    let created = category::ActiveModel {
        name: Set(name),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;
    info!(category_id = created.id, "Created category");

    Ok(to_response((StatusCode::CREATED, Json(created)), Ok(())))
}

async fn put_category(
    Path(id): Path<i32>,
    Extension(db): Extension<Arc<DatabaseConnection>>,
    ValidJson(payload): ValidJson<CategoryPayload>,
) -> Result<Response, ApiError> {
    if payload.name.is_none() {
        return Err(ApiError::field("name", REQUIRED));
    }
    update_category(id, db, payload).await
}

async fn patch_category(
    Path(id): Path<i32>,
    Extension(db): Extension<Arc<DatabaseConnection>>,
    ValidJson(payload): ValidJson<CategoryPayload>,
) -> Result<Response, ApiError> {
    update_category(id, db, payload).await
}

async fn delete_category(
    Path(id): Path<i32>,
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(config): Extension<Arc<Config>>,
) -> Result<Response, ApiError> {
    let txn = db.begin().await?;
    let category: category::ActiveModel = find_category(&txn, id).await?.into();
    let videos: Vec<String> = product::Entity::find()
        .select_only()
        .column(product::Column::Video)
        .filter(product::Column::CategoryId.eq(id))
        .filter(product::Column::Video.is_not_null())
        .into_tuple::<Option<String>>()
        .all(&txn)
        .await?
        .into_iter()
        .flatten()
        .collect();
    // Products of the category go with it through the foreign key.
    category.delete(&txn).await?;
    txn.commit().await?;

    for video in &videos {
        discard_video(&config.upload_dir, Some(video)).await;
    }
    info!(category_id = id, videos = videos.len(), "Deleted category");

    Ok(to_response(StatusCode::NO_CONTENT, Ok(())))
}

async fn update_category(
    id: i32,
    db: Arc<DatabaseConnection>,
    payload: CategoryPayload,
) -> Result<Response, ApiError> {
    let txn = db.begin().await?;
    let existing = find_category(&txn, id).await?;

    let updated = match payload.name {
        Some(name) => {
            let mut category: category::ActiveModel = existing.into();
            category.name = Set(name);
            let updated = category.update(&txn).await?;
            txn.commit().await?;
            updated
        }
        None => existing,
    };

    Ok(to_response((StatusCode::OK, Json(updated)), Ok(())))
}

async fn find_category(txn: &DatabaseTransaction, id: i32) -> Result<category::Model, ApiError> {
    CategoryEntity::find_by_id(id)
        .one(txn)
        .await?
        .ok_or_else(|| ApiError::not_found("category", id))
}

#[derive(Deserialize, Validate)]
struct CategoryPayload {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Ensure this field has between 1 and 255 characters."
    ))]
    name: Option<String>,
}
