//! Role-based access rules for every protected endpoint, in one table.

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::entities::user::Role;
use crate::middleware::{auth::Principal, logging::ApiError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    Product,
    Category,
    Order,
    Generate,
    Job,
    Export,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn from_method(method: &Method) -> Option<Action> {
        if method == Method::GET || method == Method::HEAD {
            Some(Action::Read)
        } else if method == Method::POST {
            Some(Action::Create)
        } else if method == Method::PUT || method == Method::PATCH {
            Some(Action::Update)
        } else if method == Method::DELETE {
            Some(Action::Delete)
        } else {
            None
        }
    }
}

const ANY: &[Role] = &[Role::Admin, Role::Staff, Role::Agent];
const CATALOG: &[Role] = &[Role::Admin, Role::Staff];
const ADMIN: &[Role] = &[Role::Admin];
const AGENT: &[Role] = &[Role::Agent];

struct Rule {
    resource: Resource,
    action: Action,
    roles: &'static [Role],
    denied: &'static str,
}

const fn rule(
    resource: Resource,
    action: Action,
    roles: &'static [Role],
    denied: &'static str,
) -> Rule {
    Rule {
        resource,
        action,
        roles,
        denied,
    }
}

const PRODUCT_WRITE: &str = "Only Admin or Staff can update or delete a product.";
const CATEGORY_WRITE: &str = "Only Admin can update or delete a category.";

const POLICY: &[Rule] = &[
    rule(Resource::Product, Action::Read, ANY, ""),
    rule(Resource::Product, Action::Create, CATALOG, "Only Admin and Staff can upload products."),
    rule(Resource::Product, Action::Update, CATALOG, PRODUCT_WRITE),
    rule(Resource::Product, Action::Delete, CATALOG, PRODUCT_WRITE),
    rule(Resource::Category, Action::Read, ANY, ""),
    rule(Resource::Category, Action::Create, ADMIN, "Only admin can upload categories."),
    rule(Resource::Category, Action::Update, ADMIN, CATEGORY_WRITE),
    rule(Resource::Category, Action::Delete, ADMIN, CATEGORY_WRITE),
    rule(Resource::Order, Action::Read, ANY, ""),
    rule(Resource::Order, Action::Create, AGENT, "Only agents/buyers can place orders."),
    rule(Resource::Generate, Action::Create, ADMIN, "Only admin can upload dummy products."),
    rule(Resource::Job, Action::Read, ADMIN, "Only admin can inspect background jobs."),
    rule(Resource::Export, Action::Read, ANY, ""),
];

/// Looks up the rule for `(resource, method)`; anything without a rule is denied.
pub fn authorize(resource: Resource, method: &Method, role: Role) -> Result<(), ApiError> {
    let rule = Action::from_method(method).and_then(|action| {
        POLICY
            .iter()
            .find(|rule| rule.resource == resource && rule.action == action)
    });

    match rule {
        Some(rule) if rule.roles.contains(&role) => Ok(()),
        Some(rule) if !rule.denied.is_empty() => Err(ApiError::Forbidden(rule.denied.to_string())),
        _ => Err(ApiError::Forbidden(
            "You do not have permission to perform this action.".to_string(),
        )),
    }
}

pub async fn policy_middleware(
    State(resource): State<Resource>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let role = req
        .extensions()
        .get::<Principal>()
        .map(|principal| principal.role)
        .ok_or_else(|| {
            ApiError::Unauthorized("Authentication credentials were not provided.".to_string())
        })?;

    authorize(resource, req.method(), role)?;
    debug!(?resource, method = %req.method(), %role, "Authorized request");

    Ok(next.run(req).await)
}
