//! Unseal file rotation across a simulated restart (scenario S4).
//!
//! `TestKmsServer` unseals a fresh `sqlite::memory:` database per test, which
//! can't model "restart the process with a different unseal file" — that
//! needs a database that actually survives the restart. These tests build
//! the `Config`/`DbPool`/`Barrier` stack directly against a temp-file SQLite
//! database instead.

use common::secret::ExposeSecret;
use kms_core::barrier::Barrier;
use kms_core::config::Config;
use kms_core::db::DbPool;
use kms_test_utils::test_unseal_secrets;
use std::collections::HashMap;
use uuid::Uuid;

fn write_unseal_file(dir: &std::path::Path, name: &str, secret: &[u8]) -> String {
    let path = dir.join(name);
    std::fs::write(&path, secret).expect("write unseal file");
    path.to_string_lossy().to_string()
}

fn config_vars(database_url: &str, unseal_files: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("KMS_DATABASE_URL".to_string(), database_url.to_string());
    vars.insert("KMS_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string());
    vars.insert("KMS_UNSEAL_FILES".to_string(), unseal_files.to_string());
    vars
}

/// Replacing one of N unseal files with a brand-new secret (simulating an
/// operator rotating that quorum member's file) doesn't prevent unsealing
/// on the next restart, as long as the remaining original files are still
/// present.
#[tokio::test]
async fn unseal_survives_replacing_one_of_several_files() -> Result<(), anyhow::Error> {
    let tmp = tempfile_dir()?;
    let db_path = tmp.join("kms-s4.sqlite");
    let database_url = format!("sqlite://{}", db_path.display());

    let secrets = test_unseal_secrets();
    let file_a = write_unseal_file(&tmp, "unseal-a", &secrets[0]);
    let file_b = write_unseal_file(&tmp, "unseal-b", &secrets[1]);
    let file_c = write_unseal_file(&tmp, "unseal-c", &secrets[2]);
    let unseal_files = format!("{file_a}:{file_b}:{file_c}");

    {
        let config = Config::from_vars(&config_vars(&database_url, &unseal_files))?;
        let db = DbPool::open(&config).await?;
        let raw_secrets: Vec<Vec<u8>> = config.unseal_secrets.iter().map(|s| s.expose_secret().clone()).collect();
        let barrier = Barrier::unseal(&raw_secrets, &config, &db).await?;
        let mut tx = db.begin().await?;
        barrier.ensure_bootstrapped(&mut tx).await?;
        tx.commit().await?;
    }

    // Simulate an operator rotating file B's secret to a brand-new value
    // while leaving A and C untouched.
    let new_secret: Vec<u8> = (200u8..232).collect();
    std::fs::write(&file_b, &new_secret)?;

    let config = Config::from_vars(&config_vars(&database_url, &unseal_files))?;
    let db = DbPool::open(&config).await?;
    let raw_secrets: Vec<Vec<u8>> = config.unseal_secrets.iter().map(|s| s.expose_secret().clone()).collect();
    let result = Barrier::unseal(&raw_secrets, &config, &db).await;

    assert!(result.is_ok(), "unseal must still succeed via the two untouched secrets: {:?}", result.err());

    Ok(())
}

/// If every unseal file's secret changes across a restart, none of the new
/// derived keys can unwrap the persisted root key and the barrier fails
/// closed with `Sealed`.
#[tokio::test]
async fn unseal_fails_closed_when_every_secret_changes() -> Result<(), anyhow::Error> {
    let tmp = tempfile_dir()?;
    let db_path = tmp.join("kms-s4-sealed.sqlite");
    let database_url = format!("sqlite://{}", db_path.display());

    let secrets = test_unseal_secrets();
    let file_a = write_unseal_file(&tmp, "unseal-a", &secrets[0]);
    let file_b = write_unseal_file(&tmp, "unseal-b", &secrets[1]);
    let unseal_files = format!("{file_a}:{file_b}");

    {
        let config = Config::from_vars(&config_vars(&database_url, &unseal_files))?;
        let db = DbPool::open(&config).await?;
        let raw_secrets: Vec<Vec<u8>> = config.unseal_secrets.iter().map(|s| s.expose_secret().clone()).collect();
        let barrier = Barrier::unseal(&raw_secrets, &config, &db).await?;
        let mut tx = db.begin().await?;
        barrier.ensure_bootstrapped(&mut tx).await?;
        tx.commit().await?;
    }

    std::fs::write(&file_a, (1u8..33).collect::<Vec<u8>>())?;
    std::fs::write(&file_b, (33u8..65).collect::<Vec<u8>>())?;

    let config = Config::from_vars(&config_vars(&database_url, &unseal_files))?;
    let db = DbPool::open(&config).await?;
    let raw_secrets: Vec<Vec<u8>> = config.unseal_secrets.iter().map(|s| s.expose_secret().clone()).collect();
    let result = Barrier::unseal(&raw_secrets, &config, &db).await;

    assert!(matches!(result, Err(kms_core::errors::KmsError::Sealed)));

    Ok(())
}

fn tempfile_dir() -> Result<std::path::PathBuf, anyhow::Error> {
    let dir = std::env::temp_dir().join(format!("kms-s4-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
