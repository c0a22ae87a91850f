use axum::{
    async_trait,
    body::Bytes,
    extract::{DefaultBodyLimit, Extension, FromRequest, Multipart, Path, Request},
    http::{header, StatusCode},
    middleware::from_fn_with_state,
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{path::Path as FsPath, sync::Arc};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::api::validation::{field_errors, push_error, JsonBody, REQUIRED};
use crate::config::{Config, DEFAULT_VIDEO_SIZE_LIMIT};
use crate::entities::{
    category,
    product::{self, Entity as ProductEntity},
};
use crate::middleware::{
    auth::Principal,
    logging::{to_response, ApiError, FieldErrors},
    policy::{policy_middleware, Resource},
};

pub const VIDEO_DIR: &str = "videos";

//ROUTERS
pub fn product_router(config: &Config) -> Router {
    Router::new()
        .route("/products/", get(get_products).post(create_product))
        .route(
            "/products/:id/",
            get(get_product)
                .put(put_product)
                .patch(patch_product)
                .delete(delete_product),
        )
        .route_layer(from_fn_with_state(Resource::Product, policy_middleware))
        // Room for a full-size video plus the text fields around it.
        .layer(DefaultBodyLimit::max(config.video_size_limit.saturating_mul(2)))
}

//ROUTES
async fn get_products(
    Extension(db): Extension<Arc<DatabaseConnection>>,
) -> Result<Response, ApiError> {
    let txn = db.begin().await?;
    let products: Vec<ProductResponse> = ProductEntity::find()
        .order_by_asc(product::Column::Id)
        .all(&txn)
        .await?
        .into_iter()
        .map(ProductResponse::new)
        .collect();

    Ok(to_response((StatusCode::OK, Json(products)), Ok(())))
}

async fn get_product(
    Path(id): Path<i32>,
    Extension(db): Extension<Arc<DatabaseConnection>>,
) -> Result<Response, ApiError> {
    let txn = db.begin().await?;
    let product = find_product(&txn, id).await?;

    Ok(to_response(
        (StatusCode::OK, Json(ProductResponse::new(product))),
        Ok(()),
    ))
}

async fn create_product(
    Extension(principal): Extension<Principal>,
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(config): Extension<Arc<Config>>,
    form: ProductForm,
) -> Result<Response, ApiError> {
    let ProductForm {
        fields,
        video,
        mut errors,
    } = form;
    fields.check(false, &mut errors);

    let txn = db.begin().await?;
    if let Some(category_id) = fields.category {
        check_category(&txn, category_id, &mut errors).await?;
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let video = match video {
        Some(video) => Some(save_video(&config.upload_dir, &video).await?),
        None => None,
    };

    let now = Utc::now();
    let new_product = product::ActiveModel {
        category_id: Set(fields.category.unwrap_or_default()),
        title: Set(fields.title.unwrap_or_default()),
        description: Set(fields.description.unwrap_or_default()),
        price: Set(fields.price.unwrap_or_default()),
        status: Set(fields
            .status
            .unwrap_or_else(|| product::DEFAULT_STATUS.to_string())),
        // Never taken from the payload.
        uploaded_by: Set(principal.user_id),
        video: Set(video.clone()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    let created = match insert_and_commit(txn, new_product).await {
        Ok(created) => created,
        Err(err) => {
            discard_video(&config.upload_dir, video.as_deref()).await;
            return Err(err);
        }
    };
    info!(product_id = created.id, uploaded_by = principal.user_id, "Created product");

    Ok(to_response(
        (StatusCode::CREATED, Json(ProductResponse::new(created))),
        Ok(()),
    ))
}

async fn put_product(
    Path(id): Path<i32>,
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(config): Extension<Arc<Config>>,
    form: ProductForm,
) -> Result<Response, ApiError> {
    update_product(id, db, config, form, false).await
}

async fn patch_product(
    Path(id): Path<i32>,
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(config): Extension<Arc<Config>>,
    form: ProductForm,
) -> Result<Response, ApiError> {
    update_product(id, db, config, form, true).await
}

async fn delete_product(
    Path(id): Path<i32>,
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(config): Extension<Arc<Config>>,
) -> Result<Response, ApiError> {
    let txn = db.begin().await?;
    let product = find_product(&txn, id).await?;
    let video = product.video.clone();

    let product: product::ActiveModel = product.into();
    product.delete(&txn).await?;
    txn.commit().await?;

    discard_video(&config.upload_dir, video.as_deref()).await;
    info!(product_id = id, "Deleted product");

    Ok(to_response(StatusCode::NO_CONTENT, Ok(())))
}

//utils
async fn update_product(
    id: i32,
    db: Arc<DatabaseConnection>,
    config: Arc<Config>,
    form: ProductForm,
    partial: bool,
) -> Result<Response, ApiError> {
    let ProductForm {
        fields,
        video,
        mut errors,
    } = form;
    fields.check(partial, &mut errors);

    let txn = db.begin().await?;
    let existing = find_product(&txn, id).await?;
    if let Some(category_id) = fields.category {
        check_category(&txn, category_id, &mut errors).await?;
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let old_video = existing.video.clone();
    let mut product: product::ActiveModel = existing.into();

    if let Some(category_id) = fields.category {
        product.category_id = Set(category_id);
    }
    if let Some(title) = fields.title {
        product.title = Set(title);
    }
    if let Some(description) = fields.description {
        product.description = Set(description);
    }
    if let Some(price) = fields.price {
        product.price = Set(price);
    }
    if let Some(status) = fields.status {
        product.status = Set(status);
    }

    let new_video = match video {
        Some(video) => {
            let stored = save_video(&config.upload_dir, &video).await?;
            product.video = Set(Some(stored.clone()));
            Some(stored)
        }
        None => None,
    };
    product.updated_at = Set(Utc::now());

    let updated = match product.update(&txn).await {
        Ok(updated) => updated,
        Err(err) => {
            discard_video(&config.upload_dir, new_video.as_deref()).await;
            return Err(err.into());
        }
    };
    txn.commit().await?;

    if new_video.is_some() {
        discard_video(&config.upload_dir, old_video.as_deref()).await;
    }
    info!(product_id = id, partial, "Updated product");

    Ok(to_response(
        (StatusCode::OK, Json(ProductResponse::new(updated))),
        Ok(()),
    ))
}

async fn find_product(txn: &DatabaseTransaction, id: i32) -> Result<product::Model, ApiError> {
    ProductEntity::find_by_id(id)
        .one(txn)
        .await?
        .ok_or_else(|| ApiError::not_found("product", id))
}

async fn check_category(
    txn: &DatabaseTransaction,
    category_id: i32,
    errors: &mut FieldErrors,
) -> Result<(), ApiError> {
    if category::Entity::find_by_id(category_id)
        .one(txn)
        .await?
        .is_none()
    {
        push_error(
            errors,
            "category",
            format!("Invalid pk \"{category_id}\" - object does not exist."),
        );
    }
    Ok(())
}

async fn insert_and_commit(
    txn: DatabaseTransaction,
    new_product: product::ActiveModel,
) -> Result<product::Model, ApiError> {
    let created = new_product.insert(&txn).await?;
    txn.commit().await?;
    Ok(created)
}

/// Writes the upload under `<upload_dir>/videos` and returns the stored file name.
async fn save_video(upload_dir: &FsPath, video: &UploadedVideo) -> Result<String, ApiError> {
    let file_name = format!("{}.{}", Uuid::new_v4(), video.extension());
    let dir = upload_dir.join(VIDEO_DIR);

    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|err| ApiError::General(format!("Failed to create {}: {err}", dir.display())))?;
    tokio::fs::write(dir.join(&file_name), &video.data)
        .await
        .map_err(|err| ApiError::General(format!("Failed to store video: {err}")))?;

    Ok(file_name)
}

pub(crate) async fn discard_video(upload_dir: &FsPath, file_name: Option<&str>) {
    if let Some(file_name) = file_name {
        let path = upload_dir.join(VIDEO_DIR).join(file_name);
        if let Err(err) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %err, "Failed to remove stored video");
        }
    }
}

//structs
#[derive(Validate, Default, Debug)]
pub struct ProductFields {
    category: Option<i32>,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Ensure this field has between 1 and 255 characters."
    ))]
    title: Option<String>,
    #[validate(length(min = 1, message = "This field may not be blank."))]
    description: Option<String>,
    price: Option<f64>,
    #[validate(length(
        min = 1,
        max = 50,
        message = "Ensure this field has between 1 and 50 characters."
    ))]
    status: Option<String>,
}

impl ProductFields {
    /// Collects field errors; a full update requires every writable field.
    fn check(&self, partial: bool, errors: &mut FieldErrors) {
        if let Err(validation) = self.validate() {
            for (field, messages) in field_errors(&validation) {
                for message in messages {
                    push_error(errors, &field, message);
                }
            }
        }

        if let Some(price) = self.price {
            if !price.is_finite() {
                push_error(errors, "price", "A valid number is required.");
            }
        }

        if partial {
            return;
        }
        let missing = [
            ("category", self.category.is_none()),
            ("title", self.title.is_none()),
            ("description", self.description.is_none()),
            ("price", self.price.is_none()),
        ];
        for (field, is_missing) in missing {
            if is_missing && !errors.contains_key(field) {
                push_error(errors, field, REQUIRED);
            }
        }
    }
}

#[derive(Debug)]
pub struct UploadedVideo {
    file_name: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

impl UploadedVideo {
    fn extension(&self) -> String {
        let from_name = self
            .file_name
            .as_deref()
            .and_then(|name| FsPath::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_string);
        let from_type = || {
            self.content_type
                .as_deref()
                .and_then(mime_guess::get_mime_extensions_str)
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        };

        from_name
            .or_else(from_type)
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "bin".to_string())
    }
}

/// Product payload from either a JSON body or a multipart form carrying a `video` file.
pub struct ProductForm {
    fields: ProductFields,
    video: Option<UploadedVideo>,
    errors: FieldErrors,
}

#[async_trait]
impl<S> FromRequest<S> for ProductForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let limit = req
            .extensions()
            .get::<Arc<Config>>()
            .map(|config| config.video_size_limit)
            .unwrap_or(DEFAULT_VIDEO_SIZE_LIMIT);
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("multipart/form-data"))
            .unwrap_or(false);

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
            read_multipart(multipart, limit).await
        } else {
            let JsonBody(payload) = JsonBody::<ProductPayload>::from_request(req, state).await?;
            let mut errors = FieldErrors::new();
            let fields = payload.into_fields(&mut errors);
            Ok(ProductForm {
                fields,
                video: None,
                errors,
            })
        }
    }
}

async fn read_multipart(mut multipart: Multipart, limit: usize) -> Result<ProductForm, ApiError> {
    let mut fields = ProductFields::default();
    let mut video = None;
    let mut errors = FieldErrors::new();
    let multipart_error = |err: axum::extract::multipart::MultipartError| {
        ApiError::BadRequest(format!("Malformed multipart body: {}", err.body_text()))
    };

    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            // Only a video can push the body past its limit.
            Err(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                push_error(&mut errors, "video", video_too_large(limit));
                return Err(ApiError::Validation(errors));
            }
            Err(err) => return Err(multipart_error(err)),
        };
        let name = field.name().unwrap_or_default().to_string();

        if name == "video" {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let mut data: Vec<u8> = Vec::new();
            let mut oversized = false;

            // Keep draining an oversized file so the whole body is consumed.
            loop {
                match field.chunk().await {
                    Ok(Some(chunk)) => {
                        if oversized || data.len() + chunk.len() > limit {
                            oversized = true;
                            data.clear();
                            continue;
                        }
                        data.extend_from_slice(&chunk);
                    }
                    Ok(None) => break,
                    // The body limit cut the upload short.
                    Err(err) if oversized || err.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                        push_error(&mut errors, "video", video_too_large(limit));
                        return Err(ApiError::Validation(errors));
                    }
                    Err(err) => return Err(multipart_error(err)),
                }
            }

            if oversized {
                push_error(&mut errors, "video", video_too_large(limit));
            } else if !data.is_empty() {
                video = Some(UploadedVideo {
                    file_name,
                    content_type,
                    data: Bytes::from(data),
                });
            }
            continue;
        }

        let text = field.text().await.map_err(multipart_error)?;
        match name.as_str() {
            "category" => fields.category = pk_value("category", Value::String(text), &mut errors),
            "title" => fields.title = Some(text),
            "description" => fields.description = Some(text),
            "price" => fields.price = number_value("price", Value::String(text), &mut errors),
            "status" => fields.status = Some(text),
            _ => {}
        }
    }

    Ok(ProductForm {
        fields,
        video,
        errors,
    })
}

fn video_too_large(limit: usize) -> String {
    format!(
        "Video size must be less than or equal to {} MB.",
        limit / (1024 * 1024)
    )
}

/// Raw JSON product body; every field is type-checked by hand so mistakes become field errors.
#[derive(Deserialize, Default, Debug)]
struct ProductPayload {
    category: Option<Value>,
    title: Option<Value>,
    description: Option<Value>,
    price: Option<Value>,
    status: Option<Value>,
}

impl ProductPayload {
    fn into_fields(self, errors: &mut FieldErrors) -> ProductFields {
        ProductFields {
            category: self
                .category
                .and_then(|value| pk_value("category", value, errors)),
            title: self.title.and_then(|value| text_value("title", value, errors)),
            description: self
                .description
                .and_then(|value| text_value("description", value, errors)),
            price: self
                .price
                .and_then(|value| number_value("price", value, errors)),
            status: self
                .status
                .and_then(|value| text_value("status", value, errors)),
        }
    }
}

const NOT_NULL: &str = "This field may not be null.";

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(number) if number.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn pk_value(field: &str, value: Value, errors: &mut FieldErrors) -> Option<i32> {
    let parsed = match &value {
        Value::Number(number) => number.as_i64().and_then(|id| i32::try_from(id).ok()),
        Value::String(text) => text.trim().parse::<i32>().ok(),
        _ => None,
    };
    if parsed.is_none() {
        let message = match value {
            Value::Null => NOT_NULL.to_string(),
            Value::String(_) | Value::Number(_) => "Incorrect type. Expected pk value.".to_string(),
            other => format!(
                "Incorrect type. Expected pk value, received {}.",
                json_type(&other)
            ),
        };
        push_error(errors, field, message);
    }
    parsed
}

fn number_value(field: &str, value: Value, errors: &mut FieldErrors) -> Option<f64> {
    let parsed = match &value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(number) if number.is_finite() => Some(number),
        _ if value.is_null() => {
            push_error(errors, field, NOT_NULL);
            None
        }
        _ => {
            push_error(errors, field, "A valid number is required.");
            None
        }
    }
}

fn text_value(field: &str, value: Value, errors: &mut FieldErrors) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Null => {
            push_error(errors, field, NOT_NULL);
            None
        }
        _ => {
            push_error(errors, field, "Not a valid string.");
            None
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ProductResponse {
    id: i32,
    category: i32,
    title: String,
    description: String,
    price: f64,
    status: String,
    uploaded_by: i32,
    video: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    is_expensive: bool,
}

impl ProductResponse {
    pub fn new(value: product::Model) -> ProductResponse {
        ProductResponse {
            is_expensive: value.is_expensive(),
            id: value.id,
            category: value.category_id,
            title: value.title,
            description: value.description,
            price: value.price,
            status: value.status,
            uploaded_by: value.uploaded_by,
            video: value
                .video
                .map(|file| format!("/media/{VIDEO_DIR}/{file}")),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(file_name: Option<&str>, content_type: Option<&str>) -> UploadedVideo {
        UploadedVideo {
            file_name: file_name.map(str::to_string),
            content_type: content_type.map(str::to_string),
            data: Bytes::from_static(b"data"),
        }
    }

    #[test]
    fn extension_prefers_file_name_then_content_type() {
        assert_eq!(video(Some("clip.MP4"), None).extension(), "mp4");
        assert_eq!(video(None, Some("video/webm")).extension(), "webm");
        assert_eq!(video(Some("../../etc/passwd"), None).extension(), "bin");
        assert_eq!(video(None, None).extension(), "bin");
    }

    #[test]
    fn full_update_requires_every_field() {
        let mut errors = FieldErrors::new();
        ProductFields::default().check(false, &mut errors);

        for field in ["category", "title", "description", "price"] {
            assert_eq!(errors[field], vec![REQUIRED.to_string()]);
        }
        assert!(!errors.contains_key("status"));
    }

    #[test]
    fn partial_update_checks_only_present_fields() {
        let mut errors = FieldErrors::new();
        ProductFields {
            title: Some(String::new()),
            ..Default::default()
        }
        .check(true, &mut errors);

        assert_eq!(errors.len(), 1);
        assert!(errors.contains_key("title"));
    }

    #[test]
    fn response_flags_expensive_products_and_links_video() {
        let now = Utc::now();
        let response = ProductResponse::new(product::Model {
            id: 3,
            category_id: 1,
            title: "Drone".to_string(),
            description: "Flies".to_string(),
            price: 12_500.0,
            status: "pending".to_string(),
            uploaded_by: 2,
            video: Some("abc.mp4".to_string()),
            created_at: now,
            updated_at: now,
        });

        assert!(response.is_expensive);
        assert_eq!(response.video.as_deref(), Some("/media/videos/abc.mp4"));
    }

    #[test]
    fn json_payload_coerces_numeric_strings() {
        let payload: ProductPayload = serde_json::from_value(serde_json::json!({
            "category": "4",
            "title": "Lamp",
            "price": "99.90",
            "status": 7
        }))
        .unwrap();

        let mut errors = FieldErrors::new();
        let fields = payload.into_fields(&mut errors);
        assert!(errors.is_empty());
        assert_eq!(fields.category, Some(4));
        assert_eq!(fields.price, Some(99.9));
        assert_eq!(fields.status.as_deref(), Some("7"));
        assert!(fields.description.is_none());
    }

    #[test]
    fn json_payload_type_mistakes_become_field_errors() {
        let payload: ProductPayload = serde_json::from_value(serde_json::json!({
            "category": 1.5,
            "description": {"text": "x"},
            "price": "NaN"
        }))
        .unwrap();

        let mut errors = FieldErrors::new();
        let fields = payload.into_fields(&mut errors);
        fields.check(false, &mut errors);
        assert_eq!(errors["category"], vec!["Incorrect type. Expected pk value."]);
        assert_eq!(errors["description"], vec!["Not a valid string."]);
        assert_eq!(errors["price"], vec!["A valid number is required."]);
        assert_eq!(errors["title"], vec![REQUIRED]);
    }

    #[test]
    fn oversize_message_is_in_megabytes() {
        assert_eq!(
            video_too_large(DEFAULT_VIDEO_SIZE_LIMIT),
            "Video size must be less than or equal to 20 MB."
        );
    }
}
