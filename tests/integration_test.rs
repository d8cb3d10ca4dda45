use std::sync::Arc;
use std::time::{Duration, Instant};

use mockito::Server;
use places_client::auth::AuthContext;
use places_client::cache::ResponseCache;
use places_client::http::{ApiError, RetryPolicy, Timeout};
use places_client::places::Places;
use places_client::service::Service;

fn fast_policy(max_attempts: usize) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_base: 0.01,
        ..RetryPolicy::standard()
    }
}

fn service_for(server: &Server, auth: Arc<AuthContext>, max_attempts: usize) -> Service {
    Service::new(server.url(), auth)
        .with_timeout(Timeout::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
        ))
        .with_retry_policy(fast_policy(max_attempts))
}

#[test_log::test(tokio::test)]
async fn test_token_rotation_reauthenticates_next_request() {
    let mut server = Server::new_async().await;

    let old = server
        .mock("GET", "/placetypes")
        .match_header("authorization", "token-1")
        .with_status(200)
        .with_body(r#"["continent"]"#)
        .expect(1)
        .create_async()
        .await;
    let new = server
        .mock("GET", "/placetypes")
        .match_header("authorization", "token-2")
        .with_status(200)
        .with_body(r#"["continent"]"#)
        .expect(1)
        .create_async()
        .await;

    let auth = AuthContext::new("token-1");
    let places = Places::from_service(
        service_for(&server, auth.clone(), 2),
        ResponseCache::new(0, Duration::from_secs(600)),
    );

    places.placetypes().await.unwrap();
    auth.set_token("token-2");
    places.placetypes().await.unwrap();

    old.assert_async().await;
    new.assert_async().await;
}

#[test_log::test(tokio::test)]
async fn test_retry_exhaustion_follows_the_backoff_schedule() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", "/placetypes")
        .with_status(503)
        .with_body("unavailable")
        .expect(4)
        .create_async()
        .await;

    let auth = AuthContext::new("token");
    let service = service_for(&server, auth, 4);

    let started = Instant::now();
    let err = service.get_json("/placetypes", &[]).await.unwrap_err();
    let elapsed = started.elapsed();

    mock.assert_async().await;
    assert!(matches!(
        err.downcast_ref::<ApiError>(),
        Some(ApiError::ServerError(body)) if body == "unavailable"
    ));
    // Three sleeps at base 0.01: 10 + 20 + 40 ms
    assert!(
        elapsed >= Duration::from_millis(70),
        "retries returned after {:?}, faster than the backoff schedule allows",
        elapsed
    );
}

#[test_log::test(tokio::test)]
async fn test_status_to_error_mapping() {
    let cases = [
        (400, "bad request body"),
        (404, "not found body"),
        (504, "timeout body"),
    ];

    for (status, body) in cases {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/find/x")
            .with_status(status)
            .with_body(body)
            .expect(1)
            .create_async()
            .await;

        let auth = AuthContext::new("token");
        let service = service_for(&server, auth, 3);
        let err = service.get_json("/find/x", &[]).await.unwrap_err();

        mock.assert_async().await;
        let api = err
            .downcast_ref::<ApiError>()
            .unwrap_or_else(|| panic!("HTTP {} did not map to an ApiError", status));
        match status {
            400 => assert!(matches!(api, ApiError::BadRequest(b) if b == body)),
            404 => assert!(matches!(api, ApiError::NotFound(b) if b == body)),
            504 => assert!(matches!(api, ApiError::GatewayTimeout(b) if b == body)),
            _ => unreachable!(),
        }
    }
}

#[test_log::test(tokio::test)]
async fn test_forcelisted_statuses_exhaust_into_their_kind() {
    // 429 and 500 retry first, then surface as their own kinds
    for (status, attempts) in [(429u16, 2usize), (500, 2), (503, 2)] {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/find/x")
            .with_status(status.into())
            .with_body("still failing")
            .expect(attempts)
            .create_async()
            .await;

        let auth = AuthContext::new("token");
        let service = service_for(&server, auth, attempts);
        let err = service.get_json("/find/x", &[]).await.unwrap_err();

        mock.assert_async().await;
        let api = err
            .downcast_ref::<ApiError>()
            .unwrap_or_else(|| panic!("HTTP {} did not map to an ApiError", status));
        match status {
            429 => assert!(matches!(api, ApiError::RateLimited(_))),
            _ => assert!(matches!(api, ApiError::ServerError(_))),
        }
    }
}

#[test_log::test(tokio::test)]
async fn test_success_returns_decoded_body() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/find/morocco")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[{
                "id": 85632693,
                "name": "Morocco",
                "path": "continent:africa_country:morocco",
                "placetype": "country",
                "slug": "africa_morocco",
                "bbox": [-13.17, 27.66, -0.99, 35.92]
            }]"#,
        )
        .create_async()
        .await;

    let auth = AuthContext::new("token");
    let places = Places::from_service(
        service_for(&server, auth, 2),
        ResponseCache::new(10, Duration::from_secs(600)),
    );

    let matches = places.find("morocco", &[]).await.unwrap();

    mock.assert_async().await;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].name, "Morocco");
    assert_eq!(matches[0].bbox.len(), 4);
}

#[test_log::test(tokio::test)]
async fn test_cached_lookup_hits_the_transport_once() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/shape/africa_morocco.geojson?geom=low")
        .with_status(200)
        .with_body(r#"{"type": "Feature", "properties": {"slug": "africa_morocco"}}"#)
        .expect(1)
        .create_async()
        .await;

    let auth = AuthContext::new("token");
    let places = Places::from_service(
        service_for(&server, auth, 2),
        ResponseCache::new(10, Duration::from_secs(600)),
    );

    let first = places.shape("africa_morocco", None, None).await.unwrap();
    let second = places.shape("africa_morocco", None, None).await.unwrap();

    mock.assert_async().await;
    assert_eq!(first, second);
}

#[test_log::test(tokio::test)]
async fn test_cache_survives_token_rotation() {
    // A rotated token rebuilds the session, not the cache
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/shape/africa_morocco.geojson?geom=low")
        .match_header("authorization", "token-1")
        .with_status(200)
        .with_body(r#"{"type": "Feature"}"#)
        .expect(1)
        .create_async()
        .await;

    let auth = AuthContext::new("token-1");
    let places = Places::from_service(
        service_for(&server, auth.clone(), 2),
        ResponseCache::new(10, Duration::from_secs(600)),
    );

    places.shape("africa_morocco", None, None).await.unwrap();
    auth.set_token("token-2");
    places.shape("africa_morocco", None, None).await.unwrap();

    mock.assert_async().await;
}
