use httpstub::api::{Driver, DriverConfig, DriverState, Error, RuleBuilder};
use std::time::Duration;

use crate::utils::{client, driver};

#[tokio::test]
async fn ready_signal_alone_completes_run() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();

    // Act
    let stub = driver(dir.path()).stub().run().await.unwrap();

    // Assert
    assert_eq!(stub.state(), DriverState::Ready);
    assert_ne!(stub.port(), 0);
    assert!(stub.rules().is_empty());

    let response = client().get(stub.url("/anything")).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn every_batch_is_acknowledged_before_run_completes() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let stub = driver(dir.path())
        .stub()
        .configure(
            RuleBuilder::for_path("/a")
                .responds_with_http_status(201)
                .build()
                .unwrap(),
        )
        .configure(
            RuleBuilder::for_path("/b")
                .responds_with_http_status(202)
                .build()
                .unwrap(),
        );

    // Act
    let stub = stub.run().await.unwrap();

    // Assert
    assert_eq!(stub.rules().len(), 2);
    let b = client().get(stub.url("/b")).send().await.unwrap();
    assert_eq!(b.status(), 202);
}

#[tokio::test]
async fn kill_stops_the_server() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let mut stub = driver(dir.path()).stub().run().await.unwrap();
    let url = stub.url("/rules");
    assert!(client().get(&url).send().await.is_ok());

    // Act
    stub.kill().await;

    // Assert
    assert_eq!(stub.state(), DriverState::Killed);
    assert!(client().get(&url).send().await.is_err());
}

#[tokio::test]
async fn terminate_shuts_down_gracefully() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path());
    let stub = driver.stub().run().await.unwrap();
    let url = stub.url("/rules");
    assert_eq!(driver.supervisor().len(), 1);

    // Act
    stub.terminate().await.unwrap();

    // Assert
    assert!(driver.supervisor().is_empty());
    assert!(client().get(&url).send().await.is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn silent_process_times_out() {
    // Arrange
    let driver = Driver::new(
        DriverConfig::new("sleep")
            .arg("30")
            .ack_timeout(Duration::from_millis(200)),
    );

    // Act
    let result = driver.stub().run().await;

    // Assert
    assert!(matches!(
        result,
        Err(Error::AckTimeout {
            expected: 0,
            received: 0
        })
    ));
    assert!(driver.supervisor().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn exiting_process_is_reported() {
    // Arrange
    let driver = Driver::new(DriverConfig::new("true").ack_timeout(Duration::from_secs(5)));

    // Act
    let result = driver.stub().run().await;

    // Assert
    assert!(matches!(result, Err(Error::ServerExited)));
}

#[tokio::test]
async fn missing_binary_cannot_be_spawned() {
    // Arrange
    let driver = Driver::new(DriverConfig::new("/definitely/not/a/stub/server"));

    // Act
    let result = driver.stub().run().await;

    // Assert
    assert!(matches!(result, Err(Error::SpawnError(_, _))));
}

#[cfg(unix)]
#[tokio::test]
async fn ready_and_acks_share_one_timeout() {
    // Arrange
    let driver = Driver::new(
        DriverConfig::new("sh")
            .arg("-c")
            .arg("sleep 0.3; echo '{\"ready\":true,\"port\":1}'; exec sleep 30")
            .ack_timeout(Duration::from_millis(600)),
    );
    let stub = driver.stub().configure(
        RuleBuilder::for_path("/never/acknowledged")
            .responds_with_http_status(200)
            .build()
            .unwrap(),
    );
    let start = std::time::Instant::now();

    // Act
    let result = stub.run().await;

    // Assert
    assert!(matches!(
        result,
        Err(Error::AckTimeout {
            expected: 1,
            received: 0
        })
    ));
    assert!(start.elapsed() < Duration::from_millis(850));
}
