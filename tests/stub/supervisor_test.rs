use crate::utils::{client, driver};

#[tokio::test]
async fn kill_all_stops_every_stub() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path());

    let first = driver.stub().run().await.unwrap();
    let second = driver.stub().run().await.unwrap();
    let urls = vec![first.url("/rules"), second.url("/rules")];
    assert_ne!(first.port(), second.port());
    assert_eq!(driver.supervisor().len(), 2);

    // Act
    driver.supervisor().kill_all().await;

    // Assert
    assert!(driver.supervisor().is_empty());
    for url in urls {
        assert!(client().get(&url).send().await.is_err());
    }
}

#[tokio::test]
async fn dropping_a_handle_kills_its_stub() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path());
    let stub = driver.stub().run().await.unwrap();
    let url = stub.url("/rules");
    let pid = stub.pid();
    assert!(pid.is_some());

    // Act
    drop(stub);

    // Assert
    assert!(driver.supervisor().is_empty());
    let mut refused = false;
    for _ in 0..50 {
        if client().get(&url).send().await.is_err() {
            refused = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(refused);
}
