//! Redis caches for stevedore.
//!
//! Two small facilities share one key discipline:
//!
//! - [`RepositoryCache`] caches repository rows by path, plus a
//!   "size-query-timed-out" marker consulted by the store layer. The cache is
//!   a hint: a hit is validated against the requested path (the key is a hash
//!   of it), and every failure is swallowed after logging; the database
//!   stays authoritative.
//! - [`ProjectLeaseStore`] holds short-lived mutual-exclusion leases keyed by
//!   repository path, used to keep at most one import per project in flight.
//!
//! Keys embed the top-level path segment inside `{…}` so that all keys of a
//! project pin to one hash slot.
//!
//! # Example
//!
//! ```rust,ignore
//! use stevedore_redis_cache::RepositoryCache;
//!
//! async fn example() -> Result<(), stevedore_redis_cache::CacheError> {
//!     let cache = RepositoryCache::connect("redis://localhost:6379").await?;
//!     if let Some(repo) = cache.get("gitlab-org/build/foo").await {
//!         println!("cached id {}", repo.id);
//!     }
//!     Ok(())
//! }
//! ```

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sha2::{Digest as _, Sha256};
use std::time::Duration;
use stevedore::Repository;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Budget for a single cache round-trip.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a "size query timed out" marker suppresses further attempts.
pub const SIZE_TIMEOUT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const SIZE_TIMEOUT_SUFFIX: &str = ":swd-timeout";

/// Errors raised while establishing a connection or taking a lease.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("redis connection error: {0}")]
    Connection(String),

    #[error("redis command error: {0}")]
    Command(#[from] redis::RedisError),

    #[error("redis operation timed out")]
    Timeout,

    /// A lease cannot be taken for an empty repository path.
    #[error("project lease path cannot be empty")]
    EmptyPath,
}

fn top_level(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}

fn path_hash(path: &str) -> String {
    hex::encode(Sha256::digest(path.as_bytes()))
}

/// Cache key for a repository row.
///
/// The curly braces are literal: they form the key-hash tag used for slot
/// pinning.
pub fn repository_key(path: &str) -> String {
    format!(
        "registry:db:{{repository:{}:{}}}",
        top_level(path),
        path_hash(path)
    )
}

/// Cache key for a project lease.
pub fn project_lease_key(path: &str) -> String {
    format!(
        "registry:api:{{project-lease:{}:{}}}",
        top_level(path),
        path_hash(path)
    )
}

async fn connect_manager(connection_string: &str) -> Result<ConnectionManager, CacheError> {
    let client = redis::Client::open(connection_string).map_err(|e| {
        error!("failed to create redis client: {}", e);
        CacheError::Connection(e.to_string())
    })?;
    ConnectionManager::new(client).await.map_err(|e| {
        error!("failed to connect to redis: {}", e);
        CacheError::Connection(e.to_string())
    })
}

/// Repository-row cache.
///
/// All read/write operations are best effort: they run under
/// [`DEFAULT_OP_TIMEOUT`] and log-and-swallow failures.
#[derive(Clone)]
pub struct RepositoryCache {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RepositoryCache {
    /// Connect a new manager.
    ///
    /// # Errors
    /// Returns [`CacheError::Connection`] if the client cannot be created or
    /// the initial connection fails.
    pub async fn connect(connection_string: &str) -> Result<Self, CacheError> {
        Ok(Self::new(connect_manager(connection_string).await?))
    }

    /// Wrap an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        RepositoryCache {
            conn,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Cached repository row for a path, if present and valid.
    ///
    /// The key is a hash of the path, so a hit is only trusted when the
    /// cached row's path matches the lookup path.
    pub async fn get(&self, path: &str) -> Option<Repository> {
        let key = repository_key(path);
        let mut conn = self.conn.clone();
        let raw: Option<String> = match timeout(self.op_timeout, conn.get(&key)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(repository = path, "repository cache read failed: {}", e);
                return None;
            }
            Err(_) => {
                warn!(repository = path, "repository cache read timed out");
                return None;
            }
        };
        let repo: Repository = match raw.as_deref().map(serde_json::from_str) {
            Some(Ok(repo)) => repo,
            Some(Err(e)) => {
                warn!(repository = path, "corrupt repository cache entry: {}", e);
                return None;
            }
            None => return None,
        };
        // hash collisions lose here, never win
        if repo.path != path {
            warn!(
                repository = path,
                cached = %repo.path,
                "repository cache key collision"
            );
            return None;
        }
        Some(repo)
    }

    /// Cache a repository row under its path.
    pub async fn set(&self, repo: &Repository) {
        let key = repository_key(&repo.path);
        let payload = match serde_json::to_string(repo) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(repository = %repo.path, "failed to encode repository for cache: {}", e);
                return;
            }
        };
        let mut conn = self.conn.clone();
        match timeout(self.op_timeout, conn.set::<_, _, ()>(&key, payload)).await {
            Ok(Ok(())) => debug!(repository = %repo.path, "repository cached"),
            Ok(Err(e)) => warn!(repository = %repo.path, "repository cache write failed: {}", e),
            Err(_) => warn!(repository = %repo.path, "repository cache write timed out"),
        }
    }

    /// Drop the cache entry for a path.
    pub async fn delete(&self, path: &str) {
        let key = repository_key(path);
        let mut conn = self.conn.clone();
        match timeout(self.op_timeout, conn.del::<_, ()>(&key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(repository = path, "repository cache delete failed: {}", e),
            Err(_) => warn!(repository = path, "repository cache delete timed out"),
        }
    }

    /// Blank the cached row's size attribute, keeping the row cached.
    ///
    /// Distinct from [`RepositoryCache::delete`]: the row stays, only the
    /// size is forgotten.
    pub async fn invalidate_size(&self, path: &str) {
        if let Some(mut repo) = self.get(path).await {
            repo.size = None;
            self.set(&repo).await;
        }
    }

    /// Whether a size-with-descendants query for this path timed out within
    /// the marker TTL.
    pub async fn size_timed_out(&self, path: &str) -> bool {
        let key = repository_key(path) + SIZE_TIMEOUT_SUFFIX;
        let mut conn = self.conn.clone();
        match timeout(self.op_timeout, conn.get::<_, Option<String>>(&key)).await {
            Ok(Ok(value)) => value.as_deref() == Some("true"),
            Ok(Err(e)) => {
                warn!(repository = path, "size timeout marker read failed: {}", e);
                false
            }
            Err(_) => {
                warn!(repository = path, "size timeout marker read timed out");
                false
            }
        }
    }

    /// Record that a size-with-descendants query timed out, suppressing
    /// further attempts for [`SIZE_TIMEOUT_TTL`].
    pub async fn set_size_timed_out(&self, path: &str) {
        let key = repository_key(path) + SIZE_TIMEOUT_SUFFIX;
        let mut conn = self.conn.clone();
        match timeout(
            self.op_timeout,
            conn.set_ex::<_, _, ()>(&key, "true", SIZE_TIMEOUT_TTL.as_secs()),
        )
        .await
        {
            Ok(Ok(())) => debug!(repository = path, "size timeout marker set"),
            Ok(Err(e)) => warn!(repository = path, "size timeout marker write failed: {}", e),
            Err(_) => warn!(repository = path, "size timeout marker write timed out"),
        }
    }
}

/// Short-lived named leases keyed by repository path.
///
/// Unlike [`RepositoryCache`], lease operations surface their errors: the
/// caller uses them for mutual exclusion and must know when the answer is
/// unreliable.
#[derive(Clone)]
pub struct ProjectLeaseStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl ProjectLeaseStore {
    pub async fn connect(connection_string: &str) -> Result<Self, CacheError> {
        Ok(Self::new(connect_manager(connection_string).await?))
    }

    pub fn new(conn: ConnectionManager) -> Self {
        ProjectLeaseStore {
            conn,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Whether a lease is currently held for the path.
    pub async fn exists(&self, path: &str) -> Result<bool, CacheError> {
        let key = project_lease_key(path);
        let mut conn = self.conn.clone();
        timeout(self.op_timeout, conn.exists(&key))
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(CacheError::Command)
    }

    /// Take or refresh the lease for a path.
    ///
    /// # Errors
    /// [`CacheError::EmptyPath`] when the path is empty.
    pub async fn set(&self, path: &str, ttl: Duration) -> Result<(), CacheError> {
        if path.is_empty() {
            return Err(CacheError::EmptyPath);
        }
        let key = project_lease_key(path);
        let mut conn = self.conn.clone();
        timeout(
            self.op_timeout,
            conn.set_ex::<_, _, ()>(&key, path, ttl.as_secs()),
        )
        .await
        .map_err(|_| CacheError::Timeout)?
        .map_err(CacheError::Command)
    }

    /// Release the lease for a path.
    pub async fn invalidate(&self, path: &str) -> Result<(), CacheError> {
        let key = project_lease_key(path);
        let mut conn = self.conn.clone();
        timeout(self.op_timeout, conn.del::<_, ()>(&key))
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(CacheError::Command)
    }
}
