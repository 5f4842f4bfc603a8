// HTTP executor behaviour against a local mock server: status
// classification, retry counts, auth placement and timeouts.

use std::time::{Duration, Instant};

use cronx_core::config::SchedulerConfig;
use cronx_scheduler::{
    ApiKeyLocation, AuthConfig, ExecutionStatus, HttpExecutor, HttpMethod, Template,
};
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn executor() -> HttpExecutor {
    HttpExecutor::new(&SchedulerConfig::default())
}

fn fast_executor() -> HttpExecutor {
    executor().with_backoff_base(Duration::from_millis(10))
}

fn template(server: &MockServer, route: &str) -> Template {
    Template::new("check", HttpMethod::Get, &format!("{}{route}", server.uri()))
}

#[tokio::test]
async fn expected_status_succeeds_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/created"))
        .respond_with(ResponseTemplate::new(201).set_body_string("made"))
        .expect(1)
        .mount(&server)
        .await;

    let mut tpl = template(&server, "/created");
    tpl.expected_status_codes = vec![200, 201];

    let result = executor().execute(&tpl, 3).await;
    assert!(result.success);
    assert_eq!(result.status_code, Some(201));
    assert_eq!(result.body.as_deref(), Some("made"));
    assert_eq!(result.attempts, 1);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn unexpected_status_retries_with_exponential_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let tpl = template(&server, "/broken");
    let started = Instant::now();
    let result = executor().execute(&tpl, 2).await;

    // 1 s + 2 s of backoff between the three attempts
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(!result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.status_code, Some(500));
    assert_eq!(result.error.as_deref(), Some("unexpected status code 500"));
    assert!(result.duration_ms >= 3000);
    assert_eq!(result.status(), ExecutionStatus::Failure);
}

#[tokio::test]
async fn zero_retries_means_single_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let result = fast_executor().execute(&template(&server, "/"), 0).await;
    assert!(!result.success);
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn recovers_after_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let result = fast_executor().execute(&template(&server, "/flaky"), 5).await;
    assert!(result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.status_code, Some(200));
}

#[tokio::test]
async fn bearer_auth_sets_authorization_header() {
    let server = MockServer::start().await;
    Mock::given(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut tpl = template(&server, "/");
    tpl.auth = AuthConfig::Bearer {
        token: "s3cret".into(),
    };
    assert!(executor().execute(&tpl, 0).await.success);
}

#[tokio::test]
async fn basic_auth_is_base64_encoded() {
    let server = MockServer::start().await;
    Mock::given(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut tpl = template(&server, "/");
    tpl.auth = AuthConfig::Basic {
        username: "user".into(),
        password: "pass".into(),
    };
    assert!(executor().execute(&tpl, 0).await.success);
}

#[tokio::test]
async fn api_key_goes_to_header_or_query() {
    let server = MockServer::start().await;
    Mock::given(path("/h"))
        .and(header("x-api-key", "k1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/q"))
        .and(query_param("api_key", "k2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut in_header = template(&server, "/h");
    in_header.auth = AuthConfig::ApiKey {
        location: ApiKeyLocation::Header,
        key: "X-Api-Key".into(),
        value: "k1".into(),
    };
    let mut in_query = template(&server, "/q");
    in_query.auth = AuthConfig::ApiKey {
        location: ApiKeyLocation::Query,
        key: "api_key".into(),
        value: "k2".into(),
    };

    let exec = executor();
    assert!(exec.execute(&in_header, 0).await.success);
    assert!(exec.execute(&in_query, 0).await.success);
}

#[tokio::test]
async fn post_sends_body_and_custom_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("x-source", "cronx"))
        .and(body_string(r#"{"ping":true}"#))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut tpl = Template::new("hook", HttpMethod::Post, &format!("{}/hook", server.uri()));
    tpl.headers.insert("X-Source".into(), "cronx".into());
    tpl.headers
        .insert("Content-Type".into(), "application/json".into());
    tpl.body = Some(r#"{"ping":true}"#.into());

    let result = executor().execute(&tpl, 0).await;
    assert!(result.success);
    let headers = result.headers.expect("response headers");
    assert!(headers.contains_key("content-length"));
}

#[tokio::test]
async fn get_never_sends_a_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut tpl = template(&server, "/");
    tpl.body = Some("ignored".into());
    assert!(executor().execute(&tpl, 0).await.success);

    let received = server.received_requests().await.expect("recording enabled");
    assert_eq!(received.len(), 1);
    assert!(received[0].body.is_empty());
}

#[tokio::test]
async fn slow_response_is_classified_as_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let mut tpl = template(&server, "/slow");
    tpl.timeout_seconds = 1;

    let result = executor().execute(&tpl, 0).await;
    assert!(!result.success);
    assert!(result.timed_out);
    assert!(result.status_code.is_none());
    assert_eq!(result.status(), ExecutionStatus::Timeout);
}

#[tokio::test]
async fn connection_refused_is_a_failure_without_status() {
    let tpl = Template::new("dead", HttpMethod::Get, "http://127.0.0.1:1/");
    let result = executor().execute(&tpl, 0).await;

    assert!(!result.success);
    assert!(result.status_code.is_none());
    assert!(!result.timed_out);
    assert!(result.error.is_some());
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn redirects_follow_the_template_setting() {
    let server = MockServer::start().await;
    Mock::given(path("/old"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", format!("{}/new", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(path("/new"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let exec = executor();

    let follow = template(&server, "/old");
    let result = exec.execute(&follow, 0).await;
    assert!(result.success);
    assert_eq!(result.status_code, Some(200));

    let mut stay = template(&server, "/old");
    stay.follow_redirects = false;
    let result = exec.execute(&stay, 0).await;
    assert!(!result.success);
    assert_eq!(result.status_code, Some(302));

    stay.expected_status_codes = vec![302];
    assert!(exec.execute(&stay, 0).await.success);
}

#[tokio::test]
async fn oversized_body_is_cut_while_reading() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(1_000_000)))
        .mount(&server)
        .await;

    let exec = HttpExecutor::new(&SchedulerConfig {
        max_response_body_chars: 100,
        ..SchedulerConfig::default()
    });
    let result = exec.execute(&template(&server, "/big"), 0).await;

    assert!(result.success);
    let body = result.body.expect("body");
    assert!(body.starts_with(&"x".repeat(100)));
    assert!(body.ends_with("[TRUNCATED]"));
    assert_eq!(body.chars().filter(|c| *c == 'x').count(), 100);
}

#[tokio::test]
async fn body_within_budget_keeps_omitted_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("y".repeat(150)))
        .mount(&server)
        .await;

    let exec = HttpExecutor::new(&SchedulerConfig {
        max_response_body_chars: 100,
        ..SchedulerConfig::default()
    });
    let body = exec
        .execute(&template(&server, "/"), 0)
        .await
        .body
        .expect("body");
    assert!(body.ends_with("[TRUNCATED: 50 chars omitted]"));
}
