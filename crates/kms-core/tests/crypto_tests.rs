//! Encrypt/decrypt and sign/verify integration tests (scenarios S2, S5).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use kms_test_utils::{CompactAssertions, TestKmsServer, TestPoolRequestBuilder, TEST_TENANT_ACME};
use std::time::Duration;

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

/// Swaps the `kid` header claim of a compact JWS/JWE without re-signing, to
/// simulate a client presenting material under the wrong pool's key.
fn with_tampered_kid(compact: &str, new_kid: &str) -> String {
    let mut parts: Vec<&str> = compact.split('.').collect();
    let header_bytes = URL_SAFE_NO_PAD.decode(parts[0]).expect("decode header");
    let mut header: serde_json::Value = serde_json::from_slice(&header_bytes).expect("parse header");
    header["kid"] = serde_json::Value::String(new_kid.to_string());
    let encoded = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).expect("serialize header"));
    let owned = encoded;
    parts[0] = &owned;
    parts.join(".")
}

#[tokio::test]
async fn encrypt_decrypt_round_trip_and_key_listing() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;
    let client = reqwest::Client::new();

    let body = TestPoolRequestBuilder::new(TEST_TENANT_ACME, "p-enc")
        .algorithm("rsa2048")
        .key_use("enc")
        .build();
    let pool: serde_json::Value = client.post(format!("{}/pools", server.url())).json(&body).send().await?.json().await?;
    let pool_id = pool["pool_id"].as_str().expect("pool_id").to_string();
    wait_for_active_pool(&client, &server.url(), &pool_id).await;

    let plaintext_b64 = "aGVsbG8=";
    let response = client
        .post(format!("{}/pools/{pool_id}/encrypt", server.url()))
        .json(&serde_json::json!({ "plaintext": plaintext_b64 }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let jwe: serde_json::Value = response.json().await?;
    let jwe_compact = jwe["jwe"].as_str().expect("jwe").to_string();
    jwe_compact.assert_is_jwe_compact();

    let response = client
        .post(format!("{}/decrypt", server.url()))
        .json(&serde_json::json!({ "jwe": jwe_compact }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let decrypted: serde_json::Value = response.json().await?;
    assert_eq!(decrypted["plaintext"], plaintext_b64);

    let response = client.get(format!("{}/keys?pool={pool_id}", server.url())).send().await?;
    assert_eq!(response.status(), 200);
    let keys: serde_json::Value = response.json().await?;
    let keys = keys.as_array().expect("keys array");
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["status"], "active");
    assert_eq!(keys[0]["version"], 1);

    Ok(())
}

#[tokio::test]
async fn sign_verify_round_trip() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;
    let client = reqwest::Client::new();

    let body = TestPoolRequestBuilder::new(TEST_TENANT_ACME, "p-sig")
        .algorithm("ed25519")
        .key_use("sig")
        .build();
    let pool: serde_json::Value = client.post(format!("{}/pools", server.url())).json(&body).send().await?.json().await?;
    let pool_id = pool["pool_id"].as_str().expect("pool_id").to_string();
    wait_for_active_pool(&client, &server.url(), &pool_id).await;

    let response = client
        .post(format!("{}/pools/{pool_id}/sign", server.url()))
        .json(&serde_json::json!({ "payload": "aGVsbG8=" }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let jws: serde_json::Value = response.json().await?;
    let jws_compact = jws["jws"].as_str().expect("jws").to_string();
    jws_compact.assert_is_jws_compact();

    let response = client
        .post(format!("{}/verify", server.url()))
        .json(&serde_json::json!({ "jws": jws_compact }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let verified: serde_json::Value = response.json().await?;
    assert_eq!(verified["plaintext"], "aGVsbG8=");

    Ok(())
}

/// S5 — presenting a JWS whose `kid` resolves to a pool of a different
/// algorithm must fail opaquely (`Integrity`/400), not distinguish whether
/// the algorithm, the kid, or the signature itself was wrong.
#[tokio::test]
async fn verify_rejects_cross_algorithm_kid_confusion() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;
    let client = reqwest::Client::new();

    let sig_pool_body = TestPoolRequestBuilder::new(TEST_TENANT_ACME, "p-sig-confuse")
        .algorithm("ed25519")
        .key_use("sig")
        .build();
    let sig_pool: serde_json::Value = client.post(format!("{}/pools", server.url())).json(&sig_pool_body).send().await?.json().await?;
    let sig_pool_id = sig_pool["pool_id"].as_str().expect("pool_id").to_string();
    wait_for_active_pool(&client, &server.url(), &sig_pool_id).await;

    let rsa_pool_body = TestPoolRequestBuilder::new(TEST_TENANT_ACME, "p-rsa-confuse")
        .algorithm("rsa2048")
        .key_use("sig")
        .build();
    let rsa_pool: serde_json::Value = client.post(format!("{}/pools", server.url())).json(&rsa_pool_body).send().await?.json().await?;
    let rsa_pool_id = rsa_pool["pool_id"].as_str().expect("pool_id").to_string();
    wait_for_active_pool(&client, &server.url(), &rsa_pool_id).await;

    let response = client
        .post(format!("{}/pools/{rsa_pool_id}/sign", server.url()))
        .json(&serde_json::json!({ "payload": "aGVsbG8=" }))
        .send()
        .await?;
    let jws: serde_json::Value = response.json().await?;
    let rsa_jws = jws["jws"].as_str().expect("jws").to_string();

    let response = client
        .get(format!("{}/keys?pool={sig_pool_id}", server.url()))
        .send()
        .await?;
    let keys: serde_json::Value = response.json().await?;
    let sig_key_id = keys.as_array().expect("keys array")[0]["key_id"].as_str().expect("key_id").to_string();

    let confused_jws = with_tampered_kid(&rsa_jws, &sig_key_id);

    let response = client
        .post(format!("{}/verify", server.url()))
        .json(&serde_json::json!({ "jws": confused_jws }))
        .send()
        .await?;
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "INTEGRITY");

    Ok(())
}
