use httpstub::api::RuleBuilder;
use serde_json::{json, Value};

use crate::utils::{client, driver, fixture};

#[tokio::test]
async fn rewrite_streams_the_upstream_response() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let release = fixture(dir.path(), "release.xml", "<release id=\"7\"/>");

    let upstream = driver(dir.path())
        .stub()
        .configure(
            RuleBuilder::for_path("/release/details")
                .with_parameters(vec![("releaseId", "7")])
                .responds_with_file(&release)
                .build()
                .unwrap(),
        )
        .run()
        .await
        .unwrap();

    let stub = driver(dir.path())
        .stub()
        .configure(
            RuleBuilder::for_path("/catalogue/release")
                .rewrites_to(upstream.url("/release/details?releaseId=7"))
                .build()
                .unwrap(),
        )
        .run()
        .await
        .unwrap();

    // Act
    let response = client()
        .get(stub.url("/catalogue/release"))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "<release id=\"7\"/>");
}

#[tokio::test]
async fn rewrite_forwards_upstream_status() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let upstream = driver(dir.path()).stub().run().await.unwrap();

    let stub = driver(dir.path())
        .stub()
        .configure(
            RuleBuilder::for_path("/proxied")
                .rewrites_to(upstream.url("/nothing/here"))
                .build()
                .unwrap(),
        )
        .run()
        .await
        .unwrap();

    // Act
    let response = client().get(stub.url("/proxied")).send().await.unwrap();

    // Assert
    assert_eq!(response.status(), 404);
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("/nothing/here"));
}

#[tokio::test]
async fn unreadable_file_aborts_the_connection() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let stub = driver(dir.path())
        .stub()
        .configure(
            RuleBuilder::for_path("/broken")
                .responds_with_file(dir.path().join("does-not-exist.xml"))
                .build()
                .unwrap(),
        )
        .run()
        .await
        .unwrap();

    // Act
    let result = client().get(stub.url("/broken")).send().await;

    // Assert
    assert!(result.is_err());

    // The server keeps serving other requests.
    let response = client().get(stub.url("/rules")).send().await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn rules_endpoint_reports_merged_rules() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let mut stub = driver(dir.path())
        .stub()
        .configure(
            RuleBuilder::for_path("/basket/create")
                .responds_with_http_status(503)
                .build()
                .unwrap(),
        )
        .run()
        .await
        .unwrap();

    stub.configure(
        RuleBuilder::for_path("/basket/get?basketId=1")
            .responds_with_error_code("E42")
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    // Act
    let rules: Value = client()
        .get(stub.url("/rules"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // Assert
    assert_eq!(
        rules,
        json!({
            "rules": {
                "urls": {
                    "/basket/create": { "returnHttpError": 503 },
                    "/basket/get?basketId=1": { "returnError": "E42" }
                }
            }
        })
    );
}

#[tokio::test]
async fn default_headers_are_configurable() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let driver = httpstub::api::Driver::new(
        driver(dir.path())
            .config()
            .clone()
            .arg("--header")
            .arg("X-Served-By: httpstub"),
    );

    let stub = driver
        .stub()
        .configure(
            RuleBuilder::for_path("/ping")
                .responds_with_http_status(204)
                .build()
                .unwrap(),
        )
        .run()
        .await
        .unwrap();

    // Act
    let response = client().get(stub.url("/ping")).send().await.unwrap();

    // Assert
    assert_eq!(response.status(), 204);
    assert_eq!(response.headers()["x-served-by"], "httpstub");
    assert_eq!(response.headers()["accept-ranges"], "bytes");
}

#[tokio::test]
async fn error_template_can_be_replaced() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let template = fixture(dir.path(), "error.xml", "<oops code=\"error-code\"/>");
    let driver = httpstub::api::Driver::new(
        driver(dir.path())
            .config()
            .clone()
            .env("HTTPSTUB_ERROR_TEMPLATE", template.to_string_lossy()),
    );

    let stub = driver
        .stub()
        .configure(
            RuleBuilder::for_path("/fail")
                .responds_with_error_code(2001)
                .build()
                .unwrap(),
        )
        .run()
        .await
        .unwrap();

    // Act
    let response = client().get(stub.url("/fail")).send().await.unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "<oops code=\"2001\"/>");
}
