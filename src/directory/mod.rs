mod cache;

pub use cache::LookupCache;

use async_trait::async_trait;

use crate::error::DirectoryError;

/// Looks up users of a directory (e.g. a Cognito user pool) by their stable
/// identifier (`sub`).
///
/// The goal is to decouple the directory implementation (Cognito) from the
/// places where lookups get cached.
#[async_trait]
pub trait UserLookup: Send + Sync {
    type Record: Send + Sync;

    /// Returns the user whose identifier matches `sub` in the directory
    /// instance `pool_id`.
    ///
    /// Must fail with `DirectoryError::UserNotFound` if, and only if, the
    /// directory answered but has no such user.
    async fn lookup(&self, pool_id: &str, sub: &str) -> Result<Self::Record, DirectoryError>;
}
