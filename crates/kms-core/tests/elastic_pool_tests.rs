//! Single-active-generating invariant under concurrency (scenario S3).

use kms_core::repositories::elastic_keys;
use kms_test_utils::TestKmsServer;
use uuid::Uuid;

/// Ten concurrent `insert_generate` attempts for the same pool name must
/// leave at most one `generate` row in existence at any point, and exactly
/// one of the ten callers wins.
#[tokio::test]
async fn only_one_concurrent_generate_insert_succeeds() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;
    let pool_name = "rsa-2048";

    let mut handles = Vec::new();
    for _ in 0..10 {
        let db = server.db().clone();
        let pool_name = pool_name.to_string();
        handles.push(tokio::spawn(async move {
            let mut tx = db.begin().await.expect("begin tx");
            let ekid = Uuid::now_v7();
            let inserted = elastic_keys::insert_generate(&mut tx, ekid, &pool_name).await.expect("insert_generate");
            tx.commit().await.expect("commit");
            inserted.is_some()
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await? {
            wins += 1;
        }
    }
    assert_eq!(wins, 1, "exactly one concurrent insert_generate call should win the race");

    let mut tx = server.db().begin().await?;
    let generating = elastic_keys::count_by_status(&mut tx, pool_name, "generate").await?;
    tx.commit().await?;
    assert_eq!(generating, 1, "at most one generate row may exist for a pool name at any instant");

    Ok(())
}

/// Once the winning `generate` row transitions to `active`, a fresh round
/// of `insert_generate` calls can claim the slot again — the invariant
/// bounds concurrent generation, not total generation over time.
#[tokio::test]
async fn generate_slot_reopens_after_activation() -> Result<(), anyhow::Error> {
    let server = TestKmsServer::spawn().await?;
    let pool_name = "ed25519";

    let mut tx = server.db().begin().await?;
    let ekid = Uuid::now_v7();
    let row = elastic_keys::insert_generate(&mut tx, ekid, pool_name)
        .await?
        .expect("first insert_generate should win");
    elastic_keys::mark_active(&mut tx, row.ekid, "deadbeef").await?;
    tx.commit().await?;

    let mut tx = server.db().begin().await?;
    let second = elastic_keys::insert_generate(&mut tx, Uuid::now_v7(), pool_name).await?;
    tx.commit().await?;
    assert!(second.is_some(), "a new generate row should be insertable once the prior one activated");

    Ok(())
}
