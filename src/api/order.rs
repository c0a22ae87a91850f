use axum::{
    extract::Extension, http::StatusCode, middleware::from_fn_with_state, response::Response,
    routing::get, Json, Router,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tracing::info;

use crate::api::validation::{push_error, JsonBody, REQUIRED};
use crate::entities::{
    order::{self, Entity as OrderEntity},
    order_product,
    product,
    user::Role,
};
use crate::middleware::{
    auth::Principal,
    logging::{to_response, ApiError, FieldErrors},
    policy::{policy_middleware, Resource},
};

pub fn order_router() -> Router {
    Router::new()
        .route("/orders/", get(get_orders).post(create_order))
        .route_layer(from_fn_with_state(Resource::Order, policy_middleware))
}

async fn get_orders(
    Extension(principal): Extension<Principal>,
    Extension(db): Extension<Arc<DatabaseConnection>>,
) -> Result<Response, ApiError> {
    let txn = db.begin().await?;

    let mut finder = OrderEntity::find().order_by_asc(order::Column::Id);
    if principal.role != Role::Admin {
        finder = finder.filter(order::Column::UserId.eq(principal.user_id));
    }
    let orders = finder.all(&txn).await?;

    let order_ids: Vec<i32> = orders.iter().map(|order| order.id).collect();
    let mut links: HashMap<i32, Vec<i32>> = HashMap::new();
    if !order_ids.is_empty() {
        for link in order_product::Entity::find()
            .filter(order_product::Column::OrderId.is_in(order_ids))
            .order_by_asc(order_product::Column::ProductId)
            .all(&txn)
            .await?
        {
            links.entry(link.order_id).or_default().push(link.product_id);
        }
    }

    let response: Vec<OrderResponse> = orders
        .into_iter()
        .map(|order| {
            let products = links.remove(&order.id).unwrap_or_default();
            OrderResponse::new(order, products)
        })
        .collect();

    Ok(to_response((StatusCode::OK, Json(response)), Ok(())))
}

async fn create_order(
    Extension(principal): Extension<Principal>,
    Extension(db): Extension<Arc<DatabaseConnection>>,
    JsonBody(payload): JsonBody<CreateOrder>,
) -> Result<Response, ApiError> {
    let mut errors = FieldErrors::new();
    let requested: BTreeSet<i32> = match payload.products {
        None => {
            push_error(&mut errors, "products", REQUIRED);
            BTreeSet::new()
        }
        Some(ids) if ids.is_empty() => {
            push_error(&mut errors, "products", "This list may not be empty.");
            BTreeSet::new()
        }
        Some(ids) => ids.into_iter().collect(),
    };

    let txn = db.begin().await?;

    if !requested.is_empty() {
        let found: BTreeSet<i32> = product::Entity::find()
            .filter(product::Column::Id.is_in(requested.iter().copied()))
            .all(&txn)
            .await?
            .into_iter()
            .map(|product| product.id)
            .collect();
        for missing in requested.difference(&found) {
            push_error(
                &mut errors,
                "products",
                format!("Invalid pk \"{missing}\" - object does not exist."),
            );
        }
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    // The owner is always the caller.
    let created = order::ActiveModel {
        user_id: Set(principal.user_id),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let links: Vec<order_product::ActiveModel> = requested
        .iter()
        .map(|product_id| order_product::ActiveModel {
            order_id: Set(created.id),
            product_id: Set(*product_id),
        })
        .collect();
    order_product::Entity::insert_many(links)
        .exec_without_returning(&txn)
        .await?;
    txn.commit().await?;

    info!(order_id = created.id, user_id = principal.user_id, products = requested.len(), "Placed order");

    Ok(to_response(
        (
            StatusCode::CREATED,
            Json(OrderResponse::new(created, requested.into_iter().collect())),
        ),
        Ok(()),
    ))
}

//structs
#[derive(Deserialize)]
struct CreateOrder {
    products: Option<Vec<i32>>,
}

#[derive(Serialize, Debug)]
struct OrderResponse {
    id: i32,
    user: i32,
    products: Vec<i32>,
    created_at: DateTime<Utc>,
}

impl OrderResponse {
    fn new(value: order::Model, products: Vec<i32>) -> OrderResponse {
        OrderResponse {
            id: value.id,
            user: value.user_id,
            products,
            created_at: value.created_at,
        }
    }
}
