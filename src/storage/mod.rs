//! Persistence ports and their implementations.
//!
//! Every update of an existing record goes through [`VersionedStore::update`],
//! a single conditional write keyed on `(id, version)`. The store bumps the
//! version by exactly one on success and reports [`StoreError::EditConflict`]
//! when the stored version has moved on since the caller read the record.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Metadata, Movie, MovieFilter, NewMovie, NewUser, Token, User};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A persisted record carrying an optimistic-concurrency version stamp.
pub trait Versioned {
    fn id(&self) -> i64;
    fn version(&self) -> i32;
    fn set_version(&mut self, version: i32);
}

#[async_trait]
pub trait VersionedStore<T>: Send + Sync
where
    T: Versioned + Send + Sync,
{
    async fn get(&self, id: i64) -> Result<T, StoreError>;

    /// Persists `record` only if the stored version still equals
    /// `record.version()`, returning the new version.
    async fn update(&self, record: &T) -> Result<i32, StoreError>;
}

/// Commits `record` conditioned on the version it was read at and stamps the
/// committed version back onto it. A conflict leaves `record` untouched and is
/// never retried here; the requester has to re-read and resubmit.
pub async fn apply<T, S>(store: &S, record: &mut T) -> Result<i32, StoreError>
where
    T: Versioned + Send + Sync,
    S: VersionedStore<T> + ?Sized,
{
    let version = store.update(record).await?;
    record.set_version(version);
    Ok(version)
}

#[async_trait]
pub trait MovieRepository: VersionedStore<Movie> {
    async fn insert(&self, movie: NewMovie) -> Result<Movie, StoreError>;
    async fn delete(&self, id: i64) -> Result<(), StoreError>;
    async fn list(&self, filter: &MovieFilter) -> Result<(Vec<Movie>, Metadata), StoreError>;
}

#[async_trait]
pub trait UserRepository: VersionedStore<User> {
    /// Fails with [`StoreError::DuplicateEmail`] when the address is taken.
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;
    /// Looks up the owner of an unexpired token with the given scope.
    async fn get_for_token(&self, scope: &str, plaintext: &str) -> Result<User, StoreError>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn insert(&self, token: &Token) -> Result<(), StoreError>;
    async fn delete_all_for_user(&self, scope: &str, user_id: i64) -> Result<(), StoreError>;
}
