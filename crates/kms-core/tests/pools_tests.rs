//! Pool creation and lifecycle integration tests (scenario S2).

use kms_test_utils::{TestKmsServer, TestPoolRequestBuilder, TEST_TENANT_ACME};
use std::time::Duration;

/// Key generation for a freshly created pool happens on a spawned
/// background task; poll `GET /pools` until the pool's status flips to
/// `active`, bounded so a genuine regression fails the test instead of
/// hanging.
async fn wait_for_active_pool(client: &reqwest::Client, base_url: &str, pool_id: &str) -> serde_json::Value {
    for _ in 0..50 {
        let pools: serde_json::Value = client
            .get(format!("{base_url}/pools?tenant_id={TEST_TENANT_ACME}"))
            .send()
            .await
            .expect("list pools")
            .json()
            .await
            .expect("parse pools");
        if let Some(pool) = pools.as_array().and_then(|a| a.iter().find(|p| p["pool_id"] == pool_id)) {
            if pool["status"] == "active" {
                return pool.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("pool {pool_id} never became active");
}

#[tokio::test]
async fn create_pool_generates_an_active_key() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;
    let client = reqwest::Client::new();

    let body = TestPoolRequestBuilder::new(TEST_TENANT_ACME, "p1").algorithm("ed25519").key_use("sig").build();

    let response = client.post(format!("{}/pools", server.url())).json(&body).send().await?;
    assert_eq!(response.status(), 200);
    let pool: serde_json::Value = response.json().await?;
    let pool_id = pool["pool_id"].as_str().expect("pool_id").to_string();

    let active = wait_for_active_pool(&client, &server.url(), &pool_id).await;
    // `KeyPool::algorithm` is stored as `Algorithm::as_str()`'s DB form
    // ("Ed25519"), not the request body's serde wire form ("ed25519").
    assert_eq!(active["algorithm"], "Ed25519");

    Ok(())
}

#[tokio::test]
async fn list_pools_is_scoped_to_tenant() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;
    let client = reqwest::Client::new();

    let body = TestPoolRequestBuilder::new(TEST_TENANT_ACME, "p2").algorithm("ed25519").build();
    client.post(format!("{}/pools", server.url())).json(&body).send().await?;

    let other_tenant = uuid::Uuid::from_u128(999);
    let response = client
        .get(format!("{}/pools?tenant_id={}", server.url(), other_tenant))
        .send()
        .await?;
    let pools: serde_json::Value = response.json().await?;
    assert_eq!(pools.as_array().map(|a| a.len()), Some(0));

    Ok(())
}

#[tokio::test]
async fn disabling_a_pool_rejects_further_rotation() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;
    let client = reqwest::Client::new();

    let body = TestPoolRequestBuilder::new(TEST_TENANT_ACME, "p3").algorithm("ed25519").build();
    let pool: serde_json::Value = client.post(format!("{}/pools", server.url())).json(&body).send().await?.json().await?;
    let pool_id = pool["pool_id"].as_str().expect("pool_id").to_string();
    wait_for_active_pool(&client, &server.url(), &pool_id).await;

    let response = client
        .post(format!("{}/pools/{pool_id}/status", server.url()))
        .json(&serde_json::json!({ "status": "disabled" }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let response = client.post(format!("{}/pools/{pool_id}/rotate", server.url())).send().await?;
    assert_eq!(response.status(), 409);

    Ok(())
}
