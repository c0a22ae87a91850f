pub mod category;
pub mod order;
pub mod order_product;
pub mod product;
pub mod user;

use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, Schema, Set, TransactionTrait,
};
use tracing::info;

use crate::config::AdminSeed;
use crate::entities::{
    category::Entity as Category, order::Entity as Order, order_product::Entity as OrderProduct,
    product::Entity as Product, user::Entity as User,
};

/// Opens the pool; an in-memory SQLite database lives on a single pinned connection.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(database_url);
    options.sqlx_logging(false);
    if database_url.contains(":memory:") {
        options.max_connections(1).min_connections(1);
    }
    Database::connect(options).await
}

/// Creates every table that does not exist yet, parents before children.
pub async fn setup_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut statements = vec![
        schema.create_table_from_entity(User),
        schema.create_table_from_entity(Category),
        schema.create_table_from_entity(Product),
        schema.create_table_from_entity(Order),
        schema.create_table_from_entity(OrderProduct),
    ];

    for statement in statements.iter_mut() {
        statement.if_not_exists();
        db.execute(backend.build(&*statement)).await?;
    }

    Ok(())
}

/// Inserts an active admin account unless the username is already taken.
pub async fn bootstrap_admin(db: &DatabaseConnection, seed: &AdminSeed) -> Result<(), DbErr> {
    let txn = db.begin().await?;

    let existing = User::find()
        .filter(user::Column::Username.eq(&*seed.username))
        .one(&txn)
        .await?;
    if existing.is_some() {
        return txn.commit().await;
    }

    let password_hash =
        user::hash_password(&seed.password).map_err(|err| DbErr::Custom(err.to_string()))?;

    let new_admin = user::ActiveModel {
        username: Set(seed.username.clone()),
        email: Set(seed.email.clone()),
        password: Set(password_hash),
        role: Set(user::Role::Admin),
        is_active: Set(true),
        date_joined: Set(Utc::now()),
        ..Default::default()
    };
    User::insert(new_admin).exec(&txn).await?;
    txn.commit().await?;

    info!(username = %seed.username, "Bootstrapped admin account");
    Ok(())
}
