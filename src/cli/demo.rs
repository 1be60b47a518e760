//! The demo web application

use axum::{extract::State, middleware::from_fn_with_state, routing::get, Router};

use crate::middleware::{refresh_middleware, ConfigurationRefresher};

pub const COLOR_KEY: &str = "DemoApp:Color";
pub const SECRET_KEY: &str = "DemoApp:MySecretValue";
pub const BETA_FEATURE: &str = "Beta";

pub fn router(refresher: ConfigurationRefresher) -> Router {
    Router::new()
        .route("/", get(index))
        .layer(from_fn_with_state(refresher.clone(), refresh_middleware))
        .with_state(refresher)
}

async fn index(State(refresher): State<ConfigurationRefresher>) -> String {
    let client = refresher.client();
    let color = client.get_value_or(COLOR_KEY, "Red");
    let secret = client.get_value_or(SECRET_KEY, "Unknown");
    let beta = if client.is_feature_enabled(BETA_FEATURE) {
        "enabled"
    } else {
        "disabled"
    };

    format!("Color: {}\nSecret: {}\nBeta feature: {}\n", color, secret, beta)
}
