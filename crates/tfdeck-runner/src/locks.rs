//! リソースごとのロック
//!
//! 同一リソースへの変更操作をプロセス内で直列化する。
//! terraform 自身の state ロックとは無関係。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;
use tracing::info;

pub type ResourceLock = Arc<tokio::sync::Mutex<()>>;

/// リソースIDごとに遅延生成されるロック
#[derive(Debug, Default)]
pub struct ResourceLockRegistry {
    locks: Mutex<HashMap<String, ResourceLock>>,
}

impl ResourceLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `resource_id` のロック(初回使用時に作成)
    pub fn lock_for(&self, resource_id: &str) -> ResourceLock {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(resource_id.to_string()).or_default())
    }

    /// `resource_id` の排他アクセスを待つ
    pub async fn acquire(&self, resource_id: &str, operation: &'static str) -> ResourceGuard {
        let lock = self.lock_for(resource_id);
        if lock.try_lock().is_err() {
            info!(resource_id = %resource_id, operation, "Waiting for resource lock");
        }

        let guard = lock.lock_owned().await;
        info!(resource_id = %resource_id, operation, "Resource lock acquired");
        ResourceGuard {
            resource_id: resource_id.to_string(),
            operation,
            acquired_at: Instant::now(),
            _guard: guard,
        }
    }

    /// Whether a lock was ever created for `resource_id`
    pub fn contains(&self, resource_id: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.contains_key(resource_id)
    }

    /// `resource_id` が現在保持されているか(ロックは作らない)
    pub fn is_held(&self, resource_id: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(resource_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 1リソースへの排他アクセス。drop で解放
#[derive(Debug)]
pub struct ResourceGuard {
    resource_id: String,
    operation: &'static str,
    acquired_at: Instant,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceGuard {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        info!(
            resource_id = %self.resource_id,
            operation = self.operation,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Resource lock released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_lock_for_returns_the_same_lock() {
        let registry = ResourceLockRegistry::new();
        assert!(registry.is_empty());

        let a = registry.lock_for("ec2");
        let b = registry.lock_for("ec2");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("ec2"));
        assert!(!registry.contains("eks"));
    }

    #[test]
    fn test_is_held_does_not_create_locks() {
        let registry = ResourceLockRegistry::new();
        assert!(!registry.is_held("nonexistent"));
        assert!(!registry.contains("nonexistent"));
    }

    #[tokio::test]
    async fn test_guard_excludes_until_dropped() {
        let registry = Arc::new(ResourceLockRegistry::new());
        let guard = registry.acquire("ec2", "apply").await;
        assert_eq!(guard.resource_id(), "ec2");
        assert!(registry.is_held("ec2"));

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let _guard = registry.acquire("ec2", "destroy").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!registry.is_held("ec2"));
    }

    #[tokio::test]
    async fn test_distinct_resources_are_independent() {
        let registry = ResourceLockRegistry::new();
        let _ec2 = registry.acquire("ec2", "apply").await;
        let _eks = registry.acquire("eks", "apply").await;
        assert!(registry.is_held("ec2"));
        assert!(registry.is_held("eks"));
    }
}
