//! Phone lock exclusivity tests
//!
//! These run against a live PostgreSQL pointed at by `TEST_DATABASE_URL`
//! and are skipped silently when the variable is unset.

use disparo_common::config::DatabaseConfig;
use disparo_storage::repository::PhoneLockRepository;
use disparo_storage::DatabasePool;
use uuid::Uuid;

async fn test_pool() -> Option<DatabasePool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let config = DatabaseConfig {
        url: Some(url),
        max_connections: 5,
        min_connections: 1,
    };
    let pool = DatabasePool::new(&config).await.expect("database connection");
    pool.migrate().await.expect("migrations");
    Some(pool)
}

fn unique_phone() -> String {
    // Digits only so the key stays inside the E.164 shape
    let tail: String = Uuid::new_v4()
        .as_u128()
        .to_string()
        .chars()
        .take(12)
        .collect();
    format!("+55{}", tail)
}

#[tokio::test]
async fn held_phone_refuses_every_second_acquire() {
    let Some(pool) = test_pool().await else { return };
    let locks = PhoneLockRepository::new(pool.pool().clone());
    let phone = unique_phone();

    let first_holder = Uuid::new_v4();
    assert!(locks.acquire(&phone, first_holder, 60).await.unwrap());

    // Another task contending for the phone loses, and so does a task
    // that happens to present the same holder id: a live lock never
    // changes hands.
    let second_holder = Uuid::new_v4();
    assert!(!locks.acquire(&phone, second_holder, 60).await.unwrap());
    assert!(!locks.acquire(&phone, first_holder, 60).await.unwrap());

    assert!(locks.release(&phone, first_holder).await.unwrap());
}

#[tokio::test]
async fn released_phone_can_be_locked_again() {
    let Some(pool) = test_pool().await else { return };
    let locks = PhoneLockRepository::new(pool.pool().clone());
    let phone = unique_phone();

    let holder = Uuid::new_v4();
    assert!(locks.acquire(&phone, holder, 60).await.unwrap());
    assert!(locks.release(&phone, holder).await.unwrap());

    let next = Uuid::new_v4();
    assert!(locks.acquire(&phone, next, 60).await.unwrap());
    assert!(locks.release(&phone, next).await.unwrap());
}

#[tokio::test]
async fn expired_phone_lock_yields_to_a_new_holder() {
    let Some(pool) = test_pool().await else { return };
    let locks = PhoneLockRepository::new(pool.pool().clone());
    let phone = unique_phone();

    let stale = Uuid::new_v4();
    assert!(locks.acquire(&phone, stale, 0).await.unwrap());

    let fresh = Uuid::new_v4();
    assert!(locks.acquire(&phone, fresh, 60).await.unwrap());

    // The stale holder lost the row along with the takeover
    assert!(!locks.release(&phone, stale).await.unwrap());
    assert!(locks.release(&phone, fresh).await.unwrap());
}
