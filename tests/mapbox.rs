use std::time::Duration;

use httpmock::prelude::*;
use storm_etl::geocoding::{Geocoder, MapboxClient};

fn client_for(server: &MockServer) -> MapboxClient {
    MapboxClient::new("test-token", Duration::from_secs(2))
        .unwrap()
        .with_base_url(&server.base_url())
}

#[tokio::test]
async fn forward_parses_the_top_feature() {
    let server = MockServer::start();
    let lookup = server.mock(|when, then| {
        when.method(GET)
            .path_contains("Chappel")
            .query_param("access_token", "test-token")
            .query_param("limit", "1")
            .query_param("types", "place,locality");
        then.status(200).json_body(serde_json::json!({
            "features": [{
                "center": [-98.44, 31.02],
                "place_name": "Chappel, Texas, United States",
                "text": "Chappel",
                "relevance": 0.98
            }]
        }));
    });

    let place = client_for(&server).forward("Chappel", "TX").await.unwrap();

    lookup.assert();
    assert_eq!(place.lat, 31.02);
    assert_eq!(place.lon, -98.44);
    assert_eq!(place.formatted_address, "Chappel, Texas, United States");
    assert_eq!(place.place_name, "Chappel");
    assert_eq!(place.confidence, 0.98);
}

#[tokio::test]
async fn forward_without_state_queries_the_bare_name() {
    let server = MockServer::start();
    let lookup = server.mock(|when, then| {
        when.method(GET).path_contains("Chappel.json");
        then.status(200).json_body(serde_json::json!({ "features": [] }));
    });

    client_for(&server).forward("Chappel", "").await.unwrap();
    lookup.assert();
}

#[tokio::test]
async fn reverse_queries_lon_lat_order() {
    let server = MockServer::start();
    let lookup = server.mock(|when, then| {
        when.method(GET).path_contains("-98.440000,31.020000");
        then.status(200).json_body(serde_json::json!({
            "features": [{
                "center": [-98.44, 31.02],
                "place_name": "Chappel, Texas, United States",
                "text": "Chappel",
                "relevance": 0.9
            }]
        }));
    });

    let place = client_for(&server).reverse(31.02, -98.44).await.unwrap();

    lookup.assert();
    assert_eq!(place.formatted_address, "Chappel, Texas, United States");
}

#[tokio::test]
async fn no_features_yields_an_empty_place() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET);
        then.status(200).json_body(serde_json::json!({ "features": [] }));
    });

    let place = client_for(&server).reverse(0.1, 0.1).await.unwrap();

    assert!(place.formatted_address.is_empty());
    assert_eq!(place.lat, 0.0);
    assert_eq!(place.lon, 0.0);
}

#[tokio::test]
async fn api_errors_surface_as_errors() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET);
        then.status(401).body("{\"message\":\"Not Authorized\"}");
    });

    let result = client_for(&server).forward("Chappel", "TX").await;

    let err = result.expect_err("401 should fail the lookup");
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn malformed_bodies_surface_as_errors() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET);
        then.status(200).body("not json");
    });

    assert!(client_for(&server).forward("Chappel", "TX").await.is_err());
}
