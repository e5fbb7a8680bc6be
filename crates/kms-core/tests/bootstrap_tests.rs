//! Cold-start & bootstrap integration test (scenario S1).

use kms_core::repositories::{content_keys, intermediate_keys, root_keys};
use kms_test_utils::{TestKmsServer, TEST_TENANT_ACME};

#[tokio::test]
async fn cold_start_bootstraps_one_root_and_intermediate_key() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;

    let mut tx = server.db().begin().await?;
    let root = root_keys::get_active(&mut tx).await?.expect("bootstrap must create an active root key");
    let intermediate = intermediate_keys::get_active(&mut tx)
        .await?
        .expect("bootstrap must create an active intermediate key");
    let content = content_keys::get_active(&mut tx).await?;
    tx.commit().await?;

    assert_eq!(intermediate.root_kid, root.kid, "intermediate key must be wrapped under the bootstrap root key");
    assert!(content.is_none(), "no content key exists until something is encrypted");

    Ok(())
}

#[tokio::test]
async fn cold_start_reports_no_pools() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/pools?tenant_id={}", server.url(), TEST_TENANT_ACME))
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    let pools: serde_json::Value = response.json().await?;
    assert_eq!(pools.as_array().map(|a| a.len()), Some(0));

    Ok(())
}
