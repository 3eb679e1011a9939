//! Distributed scheduler lock on `scheduler_locks` (§5, §6.2). Acquisition
//! and renewal are both a single atomic compare-and-swap on `expires_at`
//! so two instances racing never both believe they hold the lock.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::error::LockError;

pub const FEATURE_STORE_JOB_KEY: &str = "feature_store_job";

pub struct SchedulerLock {
    pool: PgPool,
    lock_key: String,
    holder_id: String,
    lease: Duration,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SchedulerLock {
    /// Attempt to acquire `lock_key`. Succeeds if no row exists yet, or if
    /// the existing row's lease has already expired; an unexpired lock
    /// held by someone else is `AlreadyHeld`, the normal "another instance
    /// is running" case.
    pub async fn acquire(
        pool: PgPool,
        lock_key: &str,
        holder_id: &str,
        lease_seconds: i64,
    ) -> Result<Self, LockError> {
        let lease = Duration::seconds(lease_seconds);
        let now = Utc::now();
        let expires_at = now + lease;

        let result = sqlx::query(
            "INSERT INTO scheduler_locks (lock_key, holder_id, acquired_at, expires_at, worker_info) \
             VALUES ($1, $2, $3, $4, NULL) \
             ON CONFLICT (lock_key) DO UPDATE \
             SET holder_id = EXCLUDED.holder_id, acquired_at = EXCLUDED.acquired_at, expires_at = EXCLUDED.expires_at \
             WHERE scheduler_locks.expires_at <= $3",
        )
        .bind(lock_key)
        .bind(holder_id)
        .bind(now)
        .bind(expires_at)
        .execute(&pool)
        .await
        .map_err(|source| LockError::Database {
            lock_key: lock_key.to_string(),
            source,
        })?;

        if result.rows_affected() == 0 {
            return Err(LockError::AlreadyHeld {
                lock_key: lock_key.to_string(),
            });
        }

        Ok(Self {
            pool,
            lock_key: lock_key.to_string(),
            holder_id: holder_id.to_string(),
            lease,
            acquired_at: now,
            expires_at,
        })
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Renew the lease as long as it is still this holder's row and it
    /// has not already expired out from under them.
    pub async fn heartbeat(&mut self) -> Result<(), LockError> {
        let now = Utc::now();
        let new_expires_at = now + self.lease;

        let result = sqlx::query(
            "UPDATE scheduler_locks SET expires_at = $1 \
             WHERE lock_key = $2 AND holder_id = $3 AND expires_at > $4",
        )
        .bind(new_expires_at)
        .bind(&self.lock_key)
        .bind(&self.holder_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|source| LockError::Database {
            lock_key: self.lock_key.clone(),
            source,
        })?;

        if result.rows_affected() == 0 {
            return Err(LockError::Lost {
                lock_key: self.lock_key.clone(),
            });
        }

        self.expires_at = new_expires_at;
        Ok(())
    }

    /// Confirm the lease is still valid without renewing it, used right
    /// before a commit point to detect loss during a long cycle.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub async fn release(self) -> Result<(), LockError> {
        sqlx::query("DELETE FROM scheduler_locks WHERE lock_key = $1 AND holder_id = $2")
            .bind(&self.lock_key)
            .bind(&self.holder_id)
            .execute(&self.pool)
            .await
            .map_err(|source| LockError::Database {
                lock_key: self.lock_key.clone(),
                source,
            })?;
        Ok(())
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}
