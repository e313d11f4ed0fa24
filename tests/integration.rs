//! End-to-end scenarios (spec §8), driven with `reqwest` against a server
//! spawned on an ephemeral port, matching the teacher's own integration
//! test style of standing up the real binary/router and hitting it over
//! HTTP rather than calling handlers directly.

use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use scripthost::config;
use scripthost::server::build_router;
use tempfile::NamedTempFile;

async fn spawn_server(toml: &str) -> SocketAddr {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{toml}").unwrap();
    let cfg = config::load_config(file.path()).unwrap();

    let router = build_router(&cfg).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    // give the listener a moment to accept
    tokio::time::sleep(Duration::from_millis(20)).await;
    addr
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let addr = spawn_server(
        r#"
        [server]
        bind = "127.0.0.1:0"
        "#,
    )
    .await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn integer_query_param_resolves_or_nulls() {
    let addr = spawn_server(
        r#"
        [server]
        bind = "127.0.0.1:0"

        [[route]]
        method = "GET"
        pattern = "/items/{id}"
        guest_language = "shell"
        script = "return id"

        [[route.parameters]]
        name = "id"
        schema_kind = "integer"
        location = "path"
        "#,
    )
    .await;

    let resp = reqwest::get(format!("http://{addr}/items/42")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, serde_json::json!(42));

    let resp = reqwest::get(format!("http://{addr}/items/x")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, serde_json::Value::Null);
}

#[tokio::test]
async fn json_and_yaml_bodies_decode_to_the_same_map() {
    let addr = spawn_server(
        r#"
        [server]
        bind = "127.0.0.1:0"

        [[route]]
        method = "POST"
        pattern = "/u"
        guest_language = "shell"
        script = "return body"
        allowed_request_content_types = ["application/json", "application/yaml"]

        [[route.parameters]]
        name = "body"
        schema_kind = "object"
        location = "body"
        content_types = ["application/json", "application/yaml"]
        "#,
    )
    .await;

    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/u"))
        .header("content-type", "application/json")
        .body(r#"{"Name":"A","Age":30}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let json_body: serde_json::Value = resp.json().await.unwrap();

    let resp = client
        .post(format!("http://{addr}/u"))
        .header("content-type", "application/yaml")
        .body("name: A\nage: 30\n")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let yaml_body: serde_json::Value = resp.json().await.unwrap();

    // The binder resolves both bodies to the same `ValueMap`, but key
    // casing survives through Lua's plain table field access, so compare
    // with keys lowercased rather than relying on exact-case equality.
    assert_eq!(lowercase_keys(&json_body), lowercase_keys(&yaml_body));
}

fn lowercase_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.to_lowercase(), lowercase_keys(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[tokio::test]
async fn mismatched_content_type_is_rejected() {
    let addr = spawn_server(
        r#"
        [server]
        bind = "127.0.0.1:0"

        [[route]]
        method = "POST"
        pattern = "/u"
        guest_language = "shell"
        script = "return 1"
        allowed_request_content_types = ["application/json"]

        [[route.parameters]]
        name = "body"
        schema_kind = "object"
        location = "body"
        content_types = ["application/json"]
        "#,
    )
    .await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/u"))
        .header("content-type", "text/plain")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 415);
    let text = resp.text().await.unwrap();
    assert!(text.contains("application/json"));
}

#[tokio::test]
async fn missing_content_type_with_body_is_rejected() {
    let addr = spawn_server(
        r#"
        [server]
        bind = "127.0.0.1:0"

        [[route]]
        method = "POST"
        pattern = "/u"
        guest_language = "shell"
        script = "return 1"
        allowed_request_content_types = ["application/json"]

        [[route.parameters]]
        name = "body"
        schema_kind = "object"
        location = "body"
        content_types = ["application/json"]
        "#,
    )
    .await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/u"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 415);
}

#[tokio::test]
async fn repeated_query_params_become_an_array() {
    let addr = spawn_server(
        r#"
        [server]
        bind = "127.0.0.1:0"

        [[route]]
        method = "GET"
        pattern = "/tags"
        guest_language = "shell"
        script = "return tag"

        [[route.parameters]]
        name = "tag"
        schema_kind = "array"
        location = "query"
        "#,
    )
    .await;

    let resp = reqwest::get(format!("http://{addr}/tags?tag=a&tag=b&tag=c"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, serde_json::json!(["a", "b", "c"]));
}

#[tokio::test]
async fn client_disconnect_cancels_without_writing_a_response() {
    let addr = spawn_server(
        r#"
        [server]
        bind = "127.0.0.1:0"

        [[route]]
        method = "GET"
        pattern = "/forever"
        guest_language = "shell"
        script = "while true do end"
        "#,
    )
    .await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(150))
        .build()
        .unwrap();
    let result = client.get(format!("http://{addr}/forever")).send().await;
    assert!(result.is_err(), "expected the client-side timeout to abort the request");
}

#[tokio::test]
async fn custom_error_response_script_replaces_the_default_error_body() {
    let addr = spawn_server(
        r#"
        [server]
        bind = "127.0.0.1:0"
        error_response_script = "return 'custom failure: ' .. tostring(error_message)"

        [[route]]
        method = "GET"
        pattern = "/boom"
        guest_language = "shell"
        script = "error('kaboom')"
        "#,
    )
    .await;

    let resp = reqwest::get(format!("http://{addr}/boom")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("custom failure:"));
    assert!(!body.contains("\"error\""));
}
