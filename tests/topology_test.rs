// Location and ticket resolution against a mocked cloud.

mod common;

use common::{mock_locations, mock_no_bridge, mock_ticket, FakeBridge, LOCATIONS_PATH, TICKETS_PATH};
use ring_lighting::{LightingError, TopologyResolver};
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup() -> (MockServer, TopologyResolver, tempfile::TempDir) {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = common::config(&server, &dir.path().join("auth.json"));
    let resolver = TopologyResolver::new(&config, reqwest::Client::new());
    (server, resolver, dir)
}

fn token() -> SecretString {
    SecretString::from("access-1")
}

#[tokio::test]
async fn locations_without_a_bridge_are_skipped() {
    let (server, resolver, _dir) = setup().await;
    let bridge = FakeBridge::start(vec![]).await;
    mock_locations(&server, &[("loc-a", "Home"), ("loc-b", "Cabin"), ("loc-c", "Shed")]).await;
    mock_ticket(&server, "loc-a", &bridge).await;
    mock_no_bridge(&server, "loc-b").await;
    Mock::given(method("GET"))
        .and(path(TICKETS_PATH))
        .and(query_param("locationID", "loc-c"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "host": "unused", "ticket": "t", "assets": []
        })))
        .mount(&server)
        .await;

    let bridges = resolver.resolve(&token()).await.unwrap();

    assert_eq!(bridges.len(), 1);
    assert_eq!(bridges[0].location_id, "loc-a");
    assert_eq!(bridges[0].location_name, "Home");
    assert_eq!(bridges[0].primary_id(), "bridge-loc-a");
    assert_eq!(
        bridges[0].channel_url,
        format!("ws://{}/?authcode=tkt&ack=false&EIO=3", bridge.host())
    );
}

#[tokio::test]
async fn no_bridge_anywhere_is_no_bridges() {
    let (server, resolver, _dir) = setup().await;
    mock_locations(&server, &[("loc-a", "Home"), ("loc-b", "Cabin")]).await;
    mock_no_bridge(&server, "loc-a").await;
    mock_no_bridge(&server, "loc-b").await;

    let err = resolver.resolve(&token()).await.unwrap_err();

    assert!(matches!(err, LightingError::NoBridges));
}

#[tokio::test]
async fn first_failed_ticket_lookup_aborts_the_resolve() {
    let (server, resolver, _dir) = setup().await;
    let bridge = FakeBridge::start(vec![]).await;
    mock_locations(&server, &[("loc-a", "Home"), ("loc-b", "Cabin")]).await;
    mock_ticket(&server, "loc-a", &bridge).await;
    Mock::given(method("GET"))
        .and(path(TICKETS_PATH))
        .and(query_param("locationID", "loc-b"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let err = resolver.resolve(&token()).await.unwrap_err();

    assert!(matches!(err, LightingError::Topology(msg) if msg.contains("Cabin")));
}

#[tokio::test]
async fn server_error_with_json_body_aborts_instead_of_skipping() {
    let (server, resolver, _dir) = setup().await;
    let bridge = FakeBridge::start(vec![]).await;
    mock_locations(&server, &[("loc-a", "Home"), ("loc-b", "Cabin")]).await;
    mock_ticket(&server, "loc-a", &bridge).await;
    Mock::given(method("GET"))
        .and(path(TICKETS_PATH))
        .and(query_param("locationID", "loc-b"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({ "error": "internal server error" })),
        )
        .mount(&server)
        .await;

    let err = resolver.resolve(&token()).await.unwrap_err();

    assert!(matches!(err, LightingError::Topology(msg) if msg.contains("Cabin") && msg.contains("500")));
}

#[tokio::test]
async fn requests_carry_the_bearer_token() {
    let (server, resolver, _dir) = setup().await;
    Mock::given(method("GET"))
        .and(path(LOCATIONS_PATH))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user_locations": [{ "location_id": "loc-a", "name": "Home", "owner_id": 1 }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let locations = resolver.list_locations(&token()).await.unwrap();

    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].id, "loc-a");
}

#[tokio::test]
async fn location_listing_without_locations_is_a_topology_error() {
    let (server, resolver, _dir) = setup().await;
    Mock::given(method("GET"))
        .and(path(LOCATIONS_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": "unauthorized" })))
        .mount(&server)
        .await;

    let err = resolver.resolve(&token()).await.unwrap_err();

    assert!(matches!(err, LightingError::Topology(_)));
}
