//! Barrier unwrap cache survives rotation under concurrent load (scenario
//! S6). Scaled down to 200 round-trips to keep the test fast; the invariant
//! under test (no failure, cache survives) doesn't depend on the exact
//! count.

use kms_test_utils::{TestKmsServer, TestPoolRequestBuilder, TEST_TENANT_ACME};
use std::time::Duration;

const ROUND_TRIPS: usize = 200;
const ROTATE_AT: usize = 100;

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
async fn encrypt_decrypt_round_trips_survive_barrier_rotation() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;
    let client = reqwest::Client::new();

    let body = TestPoolRequestBuilder::new(TEST_TENANT_ACME, "p-rotation")
        .algorithm("aes256-gcm")
        .key_use("enc")
        .build();
    let pool: serde_json::Value = client.post(format!("{}/pools", server.url())).json(&body).send().await?.json().await?;
    let pool_id = pool["pool_id"].as_str().expect("pool_id").to_string();
    wait_for_active_pool(&client, &server.url(), &pool_id).await;

    let base_url = server.url();
    let mut handles = Vec::with_capacity(ROUND_TRIPS);
    for i in 0..ROUND_TRIPS {
        let client = client.clone();
        let base_url = base_url.clone();
        let pool_id = pool_id.clone();
        handles.push(tokio::spawn(async move {
            if i == ROTATE_AT {
                let response = client.post(format!("{base_url}/admin/unseal-rotate")).send().await?;
                anyhow::ensure!(response.status() == 200, "barrier rotation must succeed mid-flight");
            }

            let response = client
                .post(format!("{base_url}/pools/{pool_id}/encrypt"))
                .json(&serde_json::json!({ "plaintext": "aGVsbG8=" }))
                .send()
                .await?;
            anyhow::ensure!(response.status() == 200, "encrypt must not observe a sealed/integrity error");
            let jwe: serde_json::Value = response.json().await?;

            let response = client
                .post(format!("{base_url}/decrypt"))
                .json(&serde_json::json!({ "jwe": jwe["jwe"] }))
                .send()
                .await?;
            anyhow::ensure!(response.status() == 200, "decrypt must not observe a sealed/integrity error");
            let decrypted: serde_json::Value = response.json().await?;
            anyhow::ensure!(decrypted["plaintext"] == "aGVsbG8=", "round trip must return the original plaintext");

            Ok::<(), anyhow::Error>(())
        }));
    }

    for handle in handles {
        handle.await??;
    }

    Ok(())
}
