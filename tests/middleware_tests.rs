mod common;

use appconfig_refresh::cli::demo;
use appconfig_refresh::client::{ClientOptions, ConfigurationClient};
use appconfig_refresh::config::AppConfigSettings;
use appconfig_refresh::middleware::{ConfigurationRefresher, RefreshLayer, RefreshMode};
use appconfig_refresh::store::KeyValue;
use appconfig_refresh::utils::datetime::ManualClock;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use common::{start_time, InMemoryStore, StaticSecrets, ENDPOINT, SENTINEL};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn client(store: &Arc<InMemoryStore>, clock: &Arc<ManualClock>) -> ConfigurationClient {
    let settings = AppConfigSettings::for_endpoint(ENDPOINT)
        .with_sentinel_key(SENTINEL)
        .with_settings_cache_expiration(Duration::from_secs(30));

    ConfigurationClient::connect(
        settings,
        ClientOptions::new().with_filter("DemoApp:*").with_clock(clock.clone()),
        store.clone(),
        Arc::new(StaticSecrets::new()),
    )
    .await
    .unwrap()
}

fn store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::with(vec![
        KeyValue::new("DemoApp:Color", "Blue"),
        KeyValue::new(SENTINEL, "1"),
        KeyValue::feature_flag("Beta", true),
    ]))
}

async fn body_text(router: Router) -> String {
    let response = router
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[cfg(test)]
mod demo_route_tests {
    use super::*;

    #[tokio::test]
    async fn test_index_renders_remote_values() {
        let store = store();
        let clock = Arc::new(ManualClock::new(start_time()));
        let refresher = ConfigurationRefresher::new(client(&store, &clock).await);

        let text = body_text(demo::router(refresher)).await;
        assert!(text.contains("Color: Blue"));
        assert!(text.contains("Secret: Unknown"));
        assert!(text.contains("Beta feature: enabled"));
    }

    #[tokio::test]
    async fn test_wait_for_fresh_serves_new_value_in_same_request() {
        let store = store();
        let clock = Arc::new(ManualClock::new(start_time()));
        let refresher =
            ConfigurationRefresher::new(client(&store, &clock).await).with_mode(RefreshMode::WaitForFresh);

        store.set("DemoApp:Color", "Green");
        store.set(SENTINEL, "2");
        clock.advance(Duration::from_secs(30));

        let text = body_text(demo::router(refresher)).await;
        assert!(text.contains("Color: Green"));
        assert_eq!(store.settings_lists(), 2);
    }

    #[tokio::test]
    async fn test_background_mode_does_not_block_request() {
        let store = store();
        let clock = Arc::new(ManualClock::new(start_time()));
        let client = client(&store, &clock).await;
        let refresher = ConfigurationRefresher::new(client.clone());

        store.set("DemoApp:Color", "Green");
        store.set(SENTINEL, "2");
        store.close_gate();
        clock.advance(Duration::from_secs(30));

        // The reload is parked at the gate; the request is answered from the old snapshot
        let text = body_text(demo::router(refresher)).await;
        assert!(text.contains("Color: Blue"));

        store.open_gate();
        client.refresh().await;
        assert_eq!(client.get_value_or("DemoApp:Color", "Red"), "Green");
    }
}

#[cfg(test)]
mod layer_tests {
    use super::*;

    #[tokio::test]
    async fn test_layer_triggers_refresh_before_handler() {
        let store = store();
        let clock = Arc::new(ManualClock::new(start_time()));
        let client = client(&store, &clock).await;
        let handler_client = client.clone();

        let app = Router::new()
            .route(
                "/",
                get(move || {
                    let client = handler_client.clone();
                    async move { client.get_value_or("DemoApp:Color", "Red") }
                }),
            )
            .layer(RefreshLayer::new(
                ConfigurationRefresher::new(client).with_mode(RefreshMode::WaitForFresh),
            ));

        store.set("DemoApp:Color", "Purple");
        store.set(SENTINEL, "2");
        clock.advance(Duration::from_secs(30));

        assert_eq!(body_text(app).await, "Purple");
    }
}
