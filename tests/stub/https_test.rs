use httpstub::api::RuleBuilder;

use crate::utils::{client, driver, fixture, write_certificate};

#[tokio::test]
async fn same_port_speaks_http_and_https() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    write_certificate(dir.path());
    let basket = fixture(dir.path(), "basket.xml", "<basket secure=\"maybe\"/>");

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
    let secure = client()
        .get(stub.https_url("/basket/create"))
        .send()
        .await
        .unwrap();
    let plain = client().get(stub.url("/basket/create")).send().await.unwrap();

    // Assert
    assert_eq!(secure.status(), 200);
    assert_eq!(secure.text().await.unwrap(), "<basket secure=\"maybe\"/>");
    assert_eq!(plain.status(), 200);
    assert_eq!(plain.text().await.unwrap(), "<basket secure=\"maybe\"/>");
}

#[tokio::test]
async fn without_certificate_only_http_is_served() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let stub = driver(dir.path()).stub().run().await.unwrap();

    // Act
    let secure = client().get(stub.https_url("/rules")).send().await;
    let plain = client().get(stub.url("/rules")).send().await.unwrap();

    // Assert
    assert!(secure.is_err());
    assert_eq!(plain.status(), 200);
}
