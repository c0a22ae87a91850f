use axum::{
    extract::Extension,
    http::{header, StatusCode},
    middleware::from_fn_with_state,
    response::Response,
    routing::get,
    Router,
};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder, TransactionTrait};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::info;

use crate::entities::{category, product, user};
use crate::middleware::{
    logging::{to_response, ApiError},
    policy::{policy_middleware, Resource},
};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const SHEET_NAME: &str = "Sheet1";
pub const HEADER: [&str; 7] = [
    "ID",
    "Title",
    "Category",
    "Description",
    "Price",
    "Uploaded By",
    "Status",
];

/// Longest text a single spreadsheet cell can hold, in characters.
pub const MAX_CELL_CHARS: usize = 32_767;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to render workbook: {0}")]
    Workbook(#[from] XlsxError),
}

impl From<ExportError> for ApiError {
    fn from(value: ExportError) -> Self {
        ApiError::General(value.to_string())
    }
}

/// One spreadsheet line, with the related names already resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportRow {
    pub id: i32,
    pub title: String,
    pub category: String,
    pub description: String,
    pub price: f64,
    pub uploaded_by: String,
    pub status: String,
}

pub fn export_router() -> Router {
    Router::new()
        .route("/export", get(export_products))
        .route_layer(from_fn_with_state(Resource::Export, policy_middleware))
}

async fn export_products(
    Extension(db): Extension<Arc<DatabaseConnection>>,
) -> Result<Response, ApiError> {
    let txn = db.begin().await?;

    let categories: HashMap<i32, String> = category::Entity::find()
        .all(&txn)
        .await?
        .into_iter()
        .map(|category| (category.id, category.name))
        .collect();
    let usernames: HashMap<i32, String> = user::Entity::find()
        .all(&txn)
        .await?
        .into_iter()
        .map(|user| (user.id, user.username))
        .collect();
    let products = product::Entity::find()
        .order_by_asc(product::Column::Id)
        .all(&txn)
        .await?;
    txn.commit().await?;

    let rows: Vec<ExportRow> = products
        .into_iter()
        .map(|product| ExportRow {
            category: categories
                .get(&product.category_id)
                .cloned()
                .unwrap_or_default(),
            uploaded_by: usernames
                .get(&product.uploaded_by)
                .cloned()
                .unwrap_or_default(),
            id: product.id,
            title: product.title,
            description: product.description,
            price: product.price,
            status: product.status,
        })
        .collect();

    let workbook = render_products(&rows)?;
    info!(rows = rows.len(), bytes = workbook.len(), "Exported products");

    Ok(to_response(
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, XLSX_CONTENT_TYPE),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=products.xlsx",
                ),
            ],
            workbook,
        ),
        Ok(()),
    ))
}

/// Renders a single worksheet: the header line followed by one line per row.
pub fn render_products(rows: &[ExportRow]) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, title) in HEADER.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *title, &bold)?;
    }

    for (index, row) in rows.iter().enumerate() {
        let line = index as u32 + 1;
        worksheet.write_number(line, 0, row.id)?;
        worksheet.write_string(line, 1, cell_text(&row.title))?;
        worksheet.write_string(line, 2, cell_text(&row.category))?;
        worksheet.write_string(line, 3, cell_text(&row.description))?;
        worksheet.write_number(line, 4, row.price)?;
        worksheet.write_string(line, 5, cell_text(&row.uploaded_by))?;
        worksheet.write_string(line, 6, cell_text(&row.status))?;
    }

    Ok(workbook.save_to_buffer()?)
}

/// Cuts `text` down to what a cell accepts; longer values are truncated, not rejected.
fn cell_text(text: &str) -> &str {
    match text.char_indices().nth(MAX_CELL_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
