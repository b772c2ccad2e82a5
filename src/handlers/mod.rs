//! HTTP request handlers (route handlers) and the routers serving them.
//!
//! Each API runs as its own process, so each gets its own router. All of
//! them expose the `/livez` and `/readyz` probes.

/// Accounts API endpoints
pub mod accounts;
/// Campaign management endpoints
pub mod campaigns;
/// Liveness and readiness probes
pub mod health;
/// Public opt-out and reward microsite endpoints
pub mod public;
/// Transactions API endpoint
pub mod transactions;

use crate::{middleware::auth, state::AppState};
use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use clap::ValueEnum;
use tower_http::trace::TraceLayer;

/// The HTTP APIs a cosmos process can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Api {
    Accounts,
    Transactions,
    Campaigns,
    Public,
}

/// Build the router of one API, with probes and request tracing.
pub fn app(api: Api, state: AppState) -> Router {
    let routes = match api {
        Api::Accounts => accounts_routes(&state),
        Api::Transactions => transactions_routes(&state),
        Api::Campaigns => campaigns_routes(&state),
        Api::Public => public_routes(&state),
    };

    Router::new()
        .route("/livez", get(health::livez))
        .route("/readyz", get(health::readyz))
        .merge(routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn transactions_routes(state: &AppState) -> Router<AppState> {
    let prefix = format!("{}/transactions", state.config.api_prefix());
    Router::new()
        .route(
            &format!("{prefix}/{{retailer_slug}}"),
            post(transactions::create_transaction),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::require_vela_token,
        ))
}

fn accounts_routes(state: &AppState) -> Router<AppState> {
    let prefix = format!("{}/loyalty/{{retailer_slug}}/accounts", state.config.api_prefix());
    Router::new()
        .route(&format!("{prefix}/enrolment"), post(accounts::enrol))
        .route(
            &format!("{prefix}/getbycredentials"),
            post(accounts::get_by_credentials),
        )
        .route(
            &format!("{prefix}/{{account_holder_uuid}}"),
            get(accounts::get_account),
        )
        .route(
            &format!("{prefix}/{{account_holder_uuid}}/status"),
            get(accounts::get_status).patch(accounts::update_status),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::require_polaris_token,
        ))
}

fn campaigns_routes(state: &AppState) -> Router<AppState> {
    let prefix = format!("{}/campaigns/{{retailer_slug}}", state.config.api_prefix());
    Router::new()
        .route(
            &format!("{prefix}/status-change"),
            post(campaigns::status_change),
        )
        .route(&format!("{prefix}/migration"), post(campaigns::migration))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::require_vela_token,
        ))
}

fn public_routes(state: &AppState) -> Router<AppState> {
    let prefix = format!("{}/public/{{retailer_slug}}", state.config.api_prefix());
    Router::new()
        .route(
            &format!("{prefix}/marketing/unsubscribe"),
            get(public::unsubscribe),
        )
        .route(
            &format!("{prefix}/reward/{{reward_uuid}}"),
            get(public::reward_for_microsite),
        )
}
