use rand::thread_rng;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use tracing::info;

use crate::entities::{category, product};
use crate::jobs::fake_data;

pub const DEFAULT_COUNT: u32 = 1000;
pub const FALLBACK_CATEGORIES: usize = 5;
const INSERT_CHUNK: usize = 500;

#[derive(Clone, Debug)]
pub struct GenerateRequest {
    pub requested_by: i32,
    pub count: u32,
}

/// Inserts `request.count` fabricated products in one transaction and returns how many were created.
pub async fn generate_products(
    db: &DatabaseConnection,
    request: &GenerateRequest,
) -> Result<u64, DbErr> {
    let txn = db.begin().await?;

    let mut category_ids: Vec<i32> = category::Entity::find()
        .select_only()
        .column(category::Column::Id)
        .order_by_asc(category::Column::Id)
        .into_tuple()
        .all(&txn)
        .await?;

    if category_ids.is_empty() {
        let names = fake_data::category_names(&mut thread_rng(), FALLBACK_CATEGORIES);
        for name in names {
            let created = category::ActiveModel {
                name: Set(name),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            category_ids.push(created.id);
        }
        info!(count = category_ids.len(), "Created fallback categories");
    }

    let products = fake_data::products(
        &mut thread_rng(),
        &category_ids,
        request.requested_by,
        request.count as usize,
    );

    let mut created = 0u64;
    for chunk in products.chunks(INSERT_CHUNK) {
        product::Entity::insert_many(chunk.to_vec())
            .exec_without_returning(&txn)
            .await?;
        created += chunk.len() as u64;
    }

    txn.commit().await?;
    Ok(created)
}
