//! In-process storage. Each table sits behind one lock, so the version check
//! and the write in `update` happen as one step.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::models::movie::SortColumn;
use crate::models::{Metadata, Movie, MovieFilter, NewMovie, NewUser, Token, User};
use crate::utils::hash_token;

use super::{MovieRepository, TokenRepository, UserRepository, Versioned, VersionedStore};

struct Table<T> {
    rows: BTreeMap<i64, T>,
    next_id: i64,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl<T: Versioned + Clone> Table<T> {
    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn get(&self, id: i64) -> Result<T, StoreError> {
        self.rows.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    fn compare_and_swap(&mut self, record: &T) -> Result<i32, StoreError> {
        let stored = self.rows.get_mut(&record.id()).ok_or(StoreError::NotFound)?;
        if stored.version() != record.version() {
            return Err(StoreError::EditConflict);
        }
        let next = record.version() + 1;
        let mut updated = record.clone();
        updated.set_version(next);
        *stored = updated;
        Ok(next)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    movies: Mutex<Table<Movie>>,
    users: Mutex<Table<User>>,
    tokens: Mutex<Vec<Token>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionedStore<Movie> for MemoryStore {
    async fn get(&self, id: i64) -> Result<Movie, StoreError> {
        self.movies.lock().get(id)
    }

    async fn update(&self, movie: &Movie) -> Result<i32, StoreError> {
        self.movies.lock().compare_and_swap(movie)
    }
}

fn title_matches(title: &str, query: &str) -> bool {
    let title = title.to_lowercase();
    let words: Vec<&str> = title.split_whitespace().collect();
    query
        .to_lowercase()
        .split_whitespace()
        .all(|needle| words.contains(&needle))
}

#[async_trait]
impl MovieRepository for MemoryStore {
    async fn insert(&self, movie: NewMovie) -> Result<Movie, StoreError> {
        let mut table = self.movies.lock();
        let id = table.allocate_id();
        let movie = Movie {
            id,
            created_at: Utc::now(),
            title: movie.title,
            year: movie.year,
            runtime: movie.runtime,
            genres: movie.genres,
            version: 1,
        };
        table.rows.insert(id, movie.clone());
        Ok(movie)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.movies
            .lock()
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self, filter: &MovieFilter) -> Result<(Vec<Movie>, Metadata), StoreError> {
        let mut matches: Vec<Movie> = self
            .movies
            .lock()
            .rows
            .values()
            .filter(|m| filter.title.is_empty() || title_matches(&m.title, &filter.title))
            .filter(|m| filter.genres.iter().all(|g| m.genres.contains(g)))
            .cloned()
            .collect();

        let column = filter.sort_column();
        matches.sort_by(|a, b| {
            let ordering = match column {
                SortColumn::Id => a.id.cmp(&b.id),
                SortColumn::Title => a.title.cmp(&b.title),
                SortColumn::Year => a.year.cmp(&b.year),
                SortColumn::Runtime => a.runtime.0.cmp(&b.runtime.0),
            };
            let ordering = if filter.descending() {
                ordering.reverse()
            } else {
                ordering
            };
            ordering.then(a.id.cmp(&b.id))
        });

        let total = matches.len() as i64;
        let page: Vec<Movie> = matches
            .into_iter()
            .skip(filter.offset().max(0) as usize)
            .take(filter.limit().max(0) as usize)
            .collect();
        let metadata = if page.is_empty() {
            Metadata::default()
        } else {
            Metadata::calculate(total, filter.page, filter.page_size)
        };
        Ok((page, metadata))
    }
}

#[async_trait]
impl VersionedStore<User> for MemoryStore {
    async fn get(&self, id: i64) -> Result<User, StoreError> {
        self.users.lock().get(id)
    }

    async fn update(&self, user: &User) -> Result<i32, StoreError> {
        let mut table = self.users.lock();
        let taken = table
            .rows
            .values()
            .any(|other| other.id != user.id && other.email == user.email);
        if taken {
            return Err(StoreError::DuplicateEmail);
        }
        table.compare_and_swap(user)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut table = self.users.lock();
        if table.rows.values().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let id = table.allocate_id();
        let user = User {
            id,
            created_at: Utc::now(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            activated: user.activated,
            version: 1,
        };
        table.rows.insert(id, user.clone());
        Ok(user)
    }

    async fn get_for_token(&self, scope: &str, plaintext: &str) -> Result<User, StoreError> {
        let hash = hash_token(plaintext);
        let now = Utc::now();
        let user_id = self
            .tokens
            .lock()
            .iter()
            .find(|t| t.hash == hash && t.scope == scope && t.expiry > now)
            .map(|t| t.user_id)
            .ok_or(StoreError::NotFound)?;
        self.users.lock().get(user_id)
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn insert(&self, token: &Token) -> Result<(), StoreError> {
        if !self.users.lock().rows.contains_key(&token.user_id) {
            return Err(StoreError::NotFound);
        }
        self.tokens.lock().push(token.clone());
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: &str, user_id: i64) -> Result<(), StoreError> {
        self.tokens
            .lock()
            .retain(|t| !(t.scope == scope && t.user_id == user_id));
        Ok(())
    }
}
