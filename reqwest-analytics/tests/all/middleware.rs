use std::net::TcpListener;
use std::time::Duration;

use http::HeaderMap;
use reqwest_analytics::{
    event, AnalyticsDetailLevel, CorrelationKey, FieldValue, OutboundRequest, Payload,
    RequestOptions,
};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::helpers::Harness;

async fn server_responding(status: u16, body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(path("/orders"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn successful_request_is_recorded() {
    let server = server_responding(200, "ok").await;
    let harness = Harness::new(AnalyticsDetailLevel::Info);

    let resp = harness
        .client
        .get(format!("{}/orders", server.uri()))
        .send()
        .await
        .expect("call failed");
    assert_eq!(resp.text().await.unwrap(), "ok");

    let recorded = harness.logger.only_event();
    assert_eq!(recorded.tag(event::TAG_STATUS), Some("200"));
    assert_eq!(recorded.tag(event::TAG_TYPE), Some("GET"));
    assert_eq!(recorded.tag(event::TAG_DOMAIN), Some("127.0.0.1"));
    assert_eq!(recorded.tag("service"), Some("checkout"));
    assert_eq!(
        recorded.field(event::URL),
        &FieldValue::from(format!("{}/orders", server.uri()))
    );
    assert_eq!(recorded.field(event::IP), &FieldValue::from("127.0.0.1"));
    assert!(recorded.field(event::EXECUTION_TIME).as_f64().unwrap() >= 0.0);
    assert!(!recorded.fields.contains_key(event::RESPONSE_BODY));
    assert_eq!(
        recorded.trace_id.as_deref(),
        Some("4bf92f3577b34da6a3ce929d0e0e4736")
    );
    assert_eq!(recorded.span_id.as_deref(), Some("00f067aa0ba902b7"));

    assert_eq!(harness.tracker.lock().pending_count(), 0);
    assert_eq!(harness.controller.started(), 1);
    assert_eq!(harness.controller.stopped(), 1);
}

#[tokio::test]
async fn error_status_is_recorded_as_is() {
    let server = server_responding(503, "").await;
    let harness = Harness::new(AnalyticsDetailLevel::Info);

    let resp = harness
        .client
        .get(format!("{}/orders", server.uri()))
        .send()
        .await
        .expect("call failed");
    assert_eq!(resp.status(), 503);

    assert_eq!(
        harness.logger.only_event().tag(event::TAG_STATUS),
        Some("503")
    );
}

#[tokio::test]
async fn detailed_level_captures_truncated_bodies() {
    let server = MockServer::start().await;
    let body = "x".repeat(600);
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(201).set_body_string(body.clone()))
        .mount(&server)
        .await;
    let harness = Harness::new(AnalyticsDetailLevel::Detailed);

    let resp = harness
        .client
        .post(format!("{}/orders", server.uri()))
        .body("{\"sku\":42}")
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("call failed");

    assert_eq!(resp.status(), 201);
    assert_eq!(resp.text().await.unwrap(), body, "body must reach the caller");

    let recorded = harness.logger.only_event();
    assert_eq!(recorded.field(event::DATA), &FieldValue::from("{\"sku\":42}"));
    assert_eq!(
        recorded.field(event::RESPONSE_BODY),
        &FieldValue::from(format!("{}...", "x".repeat(512)))
    );
    assert!(recorded
        .field(event::OPTIONS)
        .as_str()
        .unwrap()
        .contains("\"timeout\":5.0"));
    assert!(!recorded.field(event::RESPONSE_HEADERS).is_null());
}

#[tokio::test]
async fn full_level_keeps_whole_bodies() {
    let body = "y".repeat(600);
    let server = server_responding(200, &body).await;
    let harness = Harness::new(AnalyticsDetailLevel::Full);

    let resp = harness
        .client
        .get(format!("{}/orders", server.uri()))
        .send()
        .await
        .expect("call failed");
    assert_eq!(resp.text().await.unwrap(), body);

    assert_eq!(
        harness.logger.only_event().field(event::RESPONSE_BODY),
        &FieldValue::from(body)
    );
}

#[tokio::test]
async fn timeout_is_recorded_as_522() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    let harness = Harness::new(AnalyticsDetailLevel::Info);

    let error = harness
        .client
        .get(format!("{}/slow", server.uri()))
        .timeout(Duration::from_millis(50))
        .send()
        .await
        .expect_err("call should time out");
    assert!(error.is_timeout());

    let recorded = harness.logger.only_event();
    assert_eq!(recorded.tag(event::TAG_STATUS), Some("522"));
    assert_eq!(
        recorded.field(event::RESPONSE_BODY),
        &FieldValue::from(error.to_string())
    );
    assert!(recorded.field(event::END_TIMESTAMP).as_f64().is_some());
    assert_eq!(harness.controller.stopped(), 1);
}

#[tokio::test]
async fn refused_connection_is_recorded_as_521() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let harness = Harness::new(AnalyticsDetailLevel::Info);

    let error = harness
        .client
        .get(format!("http://127.0.0.1:{}/orders", port))
        .send()
        .await
        .expect_err("nothing listens on the port");
    assert!(error.is_connect());

    let recorded = harness.logger.only_event();
    assert_eq!(recorded.tag(event::TAG_STATUS), Some("521"));
    assert_eq!(recorded.field(event::IP), &FieldValue::Null);
}

#[tokio::test]
async fn caller_supplied_key_is_used() {
    let server = server_responding(200, "ok").await;
    let harness = Harness::new(AnalyticsDetailLevel::Info);
    let url = format!("{}/orders", server.uri());

    let (headers, body, options) = (HeaderMap::new(), Payload::Empty, RequestOptions::new());
    harness
        .tracker
        .lock()
        .on_before_send(
            &OutboundRequest {
                url: &url,
                method: "GET",
                headers: &headers,
                body: &body,
                options: &options,
            },
            Some(CorrelationKey::from("orders")),
        )
        .unwrap();

    let error = harness
        .client
        .get(&url)
        .with_extension(CorrelationKey::from("orders"))
        .send()
        .await
        .expect_err("key is already in flight");

    let reqwest_middleware::Error::Middleware(error) = error else {
        panic!("expected a middleware error");
    };
    assert_eq!(
        error.downcast_ref::<reqwest_analytics::Error>(),
        Some(&reqwest_analytics::Error::DuplicateCorrelationKey(
            "orders".into()
        ))
    );

    let resp = harness
        .client
        .get(&url)
        .with_extension(CorrelationKey::from("other"))
        .send()
        .await
        .expect("call failed");
    assert_eq!(resp.status(), 200);

    assert_eq!(harness.logger.events().len(), 1);
    assert!(harness.tracker.lock().is_pending(&"orders".into()));
}

#[tokio::test]
async fn concurrent_requests_are_tracked_separately() {
    let server = server_responding(200, "ok").await;
    let harness = Harness::new(AnalyticsDetailLevel::Info);
    let url = format!("{}/orders", server.uri());

    let (first, second) = tokio::join!(
        harness.client.get(&url).send(),
        harness.client.get(&url).send()
    );
    assert_eq!(first.unwrap().status(), 200);
    assert_eq!(second.unwrap().status(), 200);

    assert_eq!(harness.logger.events().len(), 2);
    assert_eq!(harness.tracker.lock().pending_count(), 0);
    assert_eq!(harness.controller.started(), harness.controller.stopped());
}

#[tokio::test]
async fn dropped_request_is_recorded_as_cancelled() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    let harness = Harness::new(AnalyticsDetailLevel::Info);

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        harness.client.get(format!("{}/slow", server.uri())).send(),
    )
    .await;
    assert!(outcome.is_err(), "caller gives up before the response");

    let recorded = harness.logger.only_event();
    assert_eq!(
        recorded.field(event::RESPONSE_BODY),
        &FieldValue::from("request cancelled")
    );
    assert_eq!(harness.tracker.lock().pending_count(), 0);
    assert_eq!(harness.controller.started(), 1);
    assert_eq!(harness.controller.stopped(), 1);
}
