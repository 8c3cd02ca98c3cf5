use httpstub::api::{ConfigurationBatch, RuleBuilder};
use serde_json::json;

use crate::utils::{client, driver, fixture};

#[tokio::test]
async fn serves_file_for_exact_path() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let basket = fixture(dir.path(), "basket.xml", "<basket id=\"1\"/>");

    let stub = driver(dir.path())
        .stub()
        .configure(
            RuleBuilder::for_path("/basket/create")
                .responds_with_file(&basket)
                .build()
                .unwrap(),
        )
        .run()
        .await
        .unwrap();

    // Act
    let response = client().get(stub.url("/basket/create")).send().await.unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/xml; charset=utf-8"
    );
    assert_eq!(response.text().await.unwrap(), "<basket id=\"1\"/>");

    let other = client().get(stub.url("/basket/create/")).send().await.unwrap();
    assert_eq!(other.status(), 404);
}

#[tokio::test]
async fn query_parameters_select_the_rule() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let stub = driver(dir.path())
        .stub()
        .configure(
            RuleBuilder::for_path("/release/details")
                .with_parameters(vec![("releaseId", "12345")])
                .responds_with_error_code(90210)
                .build()
                .unwrap(),
        )
        .run()
        .await
        .unwrap();

    // Act
    let matching = client()
        .get(stub.url("/release/details?releaseId=12345"))
        .send()
        .await
        .unwrap();
    let other = client()
        .get(stub.url("/release/details?releaseId=99999"))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(matching.status(), 200);
    assert!(matching.text().await.unwrap().contains("90210"));

    assert_eq!(other.status(), 404);
    assert_eq!(other.headers()["content-type"], "text/plain; charset=utf-8");
    let diagnostic = other.text().await.unwrap();
    assert!(diagnostic.starts_with("Stub is configured using rules."));
    assert!(diagnostic.contains("/release/details?releaseId=99999"));
}

#[tokio::test]
async fn more_specific_rule_wins() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let basket = fixture(dir.path(), "basket.xml", "<basket id=\"blah\"/>");

    let batch = ConfigurationBatch::from_builders(vec![
        RuleBuilder::for_path("/basket/get")
            .with_parameters(vec![("basketId", "blah")])
            .responds_with_file(&basket),
        RuleBuilder::for_path("/basket/get").responds_with_http_status(500),
    ])
    .unwrap();

    let stub = driver(dir.path()).stub().configure(batch).run().await.unwrap();

    // Act
    let specific = client()
        .get(stub.url("/basket/get?basketId=blah&country=GB"))
        .send()
        .await
        .unwrap();
    let broad = client()
        .get(stub.url("/basket/get?basketId=other"))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(specific.status(), 200);
    assert_eq!(specific.text().await.unwrap(), "<basket id=\"blah\"/>");
    assert_eq!(broad.status(), 500);
    assert_eq!(broad.text().await.unwrap(), "");
}

#[tokio::test]
async fn later_batch_wins_between_equally_specific_rules() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let mut stub = driver(dir.path())
        .stub()
        .configure(
            RuleBuilder::for_path("/search?q=a")
                .responds_with_http_status(201)
                .build()
                .unwrap(),
        )
        .run()
        .await
        .unwrap();

    // Act
    stub.configure(
        RuleBuilder::for_path("/search?lang=en")
            .responds_with_http_status(202)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    let response = client()
        .get(stub.url("/search?q=a&lang=en"))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 202);
    assert_eq!(stub.rules().len(), 2);
}

#[tokio::test]
async fn form_data_must_match_exactly() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let session = fixture(dir.path(), "session.xml", "<session/>");

    let stub = driver(dir.path())
        .stub()
        .configure(
            RuleBuilder::for_path("/user/authenticate")
                .with_form_data(json!({ "emailAddress": "some-email" }))
                .responds_with_file(&session)
                .build()
                .unwrap(),
        )
        .run()
        .await
        .unwrap();

    // Act
    let matching = client()
        .post(stub.url("/user/authenticate"))
        .form(&[("emailAddress", "some-email")])
        .send()
        .await
        .unwrap();
    let superset = client()
        .post(stub.url("/user/authenticate"))
        .form(&[("emailAddress", "some-email"), ("password", "x")])
        .send()
        .await
        .unwrap();
    let as_json = client()
        .post(stub.url("/user/authenticate"))
        .json(&json!({ "emailAddress": "some-email" }))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(matching.status(), 200);
    assert_eq!(matching.text().await.unwrap(), "<session/>");
    assert_eq!(superset.status(), 404);
    assert_eq!(as_json.status(), 200);
}

#[tokio::test]
async fn re_registered_rule_keeps_its_place_in_ties() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let mut stub = driver(dir.path())
        .stub()
        .configure(
            ConfigurationBatch::from_builders(vec![
                RuleBuilder::for_path("/search?q=a").responds_with_http_status(201),
                RuleBuilder::for_path("/search?lang=en").responds_with_http_status(202),
            ])
            .unwrap(),
        )
        .run()
        .await
        .unwrap();

    // Act
    stub.configure(
        RuleBuilder::for_path("/search?q=a")
            .responds_with_http_status(203)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    let tied = client()
        .get(stub.url("/search?q=a&lang=en"))
        .send()
        .await
        .unwrap();
    let replaced = client().get(stub.url("/search?q=a")).send().await.unwrap();

    // Assert
    assert_eq!(tied.status(), 202);
    assert_eq!(replaced.status(), 203);
}

#[tokio::test]
async fn form_data_with_missing_field_falls_through() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let session = fixture(dir.path(), "session.xml", "<session/>");

    let stub = driver(dir.path())
        .stub()
        .configure(
            RuleBuilder::for_path("/user/authenticate")
                .with_form_data(json!({ "emailAddress": "some-email", "password": "x" }))
                .responds_with_file(&session)
                .build()
                .unwrap(),
        )
        .run()
        .await
        .unwrap();

    // Act
    let missing_field = client()
        .post(stub.url("/user/authenticate"))
        .form(&[("emailAddress", "some-email")])
        .send()
        .await
        .unwrap();
    let empty_body = client()
        .post(stub.url("/user/authenticate"))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(missing_field.status(), 404);
    assert_eq!(empty_body.status(), 404);
}
