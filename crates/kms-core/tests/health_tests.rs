//! Health and metrics endpoint integration tests.

use kms_test_utils::TestKmsServer;

#[tokio::test]
async fn health_endpoint_returns_200() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client.get(format!("{}/health", server.url())).send().await?;

    assert_eq!(response.status(), 200);
    Ok(())
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client.get(format!("{}/metrics", server.url())).send().await?;
    assert_eq!(response.status(), 200);

    Ok(())
}

#[tokio::test]
async fn unknown_route_returns_404() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client.get(format!("{}/nonexistent", server.url())).send().await?;
    assert_eq!(response.status(), 404);

    Ok(())
}
