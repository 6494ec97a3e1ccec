use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{FromRow, PgPool};

use crate::error::StoreError;
use crate::models::{Metadata, Movie, MovieFilter, NewMovie, NewUser, Token, User};
use crate::utils::hash_token;

use super::{MovieRepository, TokenRepository, UserRepository, VersionedStore};

const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

const USERS_EMAIL_CONSTRAINT: &str = "users_email_key";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Tells a missing row apart from a version mismatch after a conditional
    /// update matched nothing.
    async fn classify_miss(&self, table: &'static str, id: i64) -> StoreError {
        let query = format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1)");
        let exists = bounded(sqlx::query_scalar::<_, bool>(&query).bind(id).fetch_one(&self.pool)).await;
        match exists {
            Ok(true) => StoreError::EditConflict,
            Ok(false) => StoreError::NotFound,
            Err(err) => err,
        }
    }
}

async fn bounded<T, F>(fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout),
    }
}

fn map_unique_email(err: StoreError) -> StoreError {
    match err {
        StoreError::Database(sqlx::Error::Database(db))
            if db.constraint() == Some(USERS_EMAIL_CONSTRAINT) =>
        {
            StoreError::DuplicateEmail
        }
        other => other,
    }
}

fn not_found_on_missing_row(err: StoreError) -> StoreError {
    match err {
        StoreError::Database(sqlx::Error::RowNotFound) => StoreError::NotFound,
        other => other,
    }
}

#[async_trait]
impl VersionedStore<Movie> for PgStore {
    async fn get(&self, id: i64) -> Result<Movie, StoreError> {
        if id < 1 {
            return Err(StoreError::NotFound);
        }
        bounded(
            sqlx::query_as::<_, Movie>(
                r#"
                SELECT id, created_at, title, year, runtime, genres, version
                FROM movies
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_one(&self.pool),
        )
        .await
        .map_err(not_found_on_missing_row)
    }

    async fn update(&self, movie: &Movie) -> Result<i32, StoreError> {
        let version = bounded(
            sqlx::query_scalar::<_, i32>(
                r#"
                UPDATE movies
                SET title = $1, year = $2, runtime = $3, genres = $4, version = version + 1
                WHERE id = $5 AND version = $6
                RETURNING version
                "#,
            )
            .bind(&movie.title)
            .bind(movie.year)
            .bind(movie.runtime)
            .bind(&movie.genres)
            .bind(movie.id)
            .bind(movie.version)
            .fetch_optional(&self.pool),
        )
        .await?;

        match version {
            Some(version) => Ok(version),
            None => Err(self.classify_miss("movies", movie.id).await),
        }
    }
}

#[derive(FromRow)]
struct MovieWithTotal {
    total: i64,
    #[sqlx(flatten)]
    movie: Movie,
}

#[async_trait]
impl MovieRepository for PgStore {
    async fn insert(&self, movie: NewMovie) -> Result<Movie, StoreError> {
        bounded(
            sqlx::query_as::<_, Movie>(
                r#"
                INSERT INTO movies (title, year, runtime, genres)
                VALUES ($1, $2, $3, $4)
                RETURNING id, created_at, title, year, runtime, genres, version
                "#,
            )
            .bind(movie.title)
            .bind(movie.year)
            .bind(movie.runtime)
            .bind(movie.genres)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        if id < 1 {
            return Err(StoreError::NotFound);
        }
        let result = bounded(
            sqlx::query("DELETE FROM movies WHERE id = $1")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, filter: &MovieFilter) -> Result<(Vec<Movie>, Metadata), StoreError> {
        // The sort column comes from a fixed enum, never from client text.
        let query = format!(
            r#"
            SELECT count(*) OVER() AS total, id, created_at, title, year, runtime, genres, version
            FROM movies
            WHERE (to_tsvector('simple', title) @@ plainto_tsquery('simple', $1) OR $1 = '')
            AND (genres @> $2 OR $2 = '{{}}')
            ORDER BY {} {}, id ASC
            LIMIT $3 OFFSET $4
            "#,
            filter.sort_column().as_sql(),
            if filter.descending() { "DESC" } else { "ASC" },
        );

        let rows = bounded(
            sqlx::query_as::<_, MovieWithTotal>(&query)
                .bind(&filter.title)
                .bind(&filter.genres)
                .bind(filter.limit())
                .bind(filter.offset())
                .fetch_all(&self.pool),
        )
        .await?;

        let total = rows.first().map(|row| row.total).unwrap_or(0);
        let movies = rows.into_iter().map(|row| row.movie).collect();
        Ok((movies, Metadata::calculate(total, filter.page, filter.page_size)))
    }
}

#[async_trait]
impl VersionedStore<User> for PgStore {
    async fn get(&self, id: i64) -> Result<User, StoreError> {
        bounded(
            sqlx::query_as::<_, User>(
                r#"
                SELECT id, created_at, name, email, password_hash, activated, version
                FROM users
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_one(&self.pool),
        )
        .await
        .map_err(not_found_on_missing_row)
    }

    async fn update(&self, user: &User) -> Result<i32, StoreError> {
        let version = bounded(
            sqlx::query_scalar::<_, i32>(
                r#"
                UPDATE users
                SET name = $1, email = $2, password_hash = $3, activated = $4, version = version + 1
                WHERE id = $5 AND version = $6
                RETURNING version
                "#,
            )
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.activated)
            .bind(user.id)
            .bind(user.version)
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(map_unique_email)?;

        match version {
            Some(version) => Ok(version),
            None => Err(self.classify_miss("users", user.id).await),
        }
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        bounded(
            sqlx::query_as::<_, User>(
                r#"
                INSERT INTO users (name, email, password_hash, activated)
                VALUES ($1, $2, $3, $4)
                RETURNING id, created_at, name, email, password_hash, activated, version
                "#,
            )
            .bind(user.name)
            .bind(user.email)
            .bind(user.password_hash)
            .bind(user.activated)
            .fetch_one(&self.pool),
        )
        .await
        .map_err(map_unique_email)
    }

    async fn get_for_token(&self, scope: &str, plaintext: &str) -> Result<User, StoreError> {
        bounded(
            sqlx::query_as::<_, User>(
                r#"
                SELECT users.id, users.created_at, users.name, users.email,
                       users.password_hash, users.activated, users.version
                FROM users
                INNER JOIN tokens ON users.id = tokens.user_id
                WHERE tokens.hash = $1
                AND tokens.scope = $2
                AND tokens.expiry > $3
                "#,
            )
            .bind(hash_token(plaintext))
            .bind(scope)
            .bind(Utc::now())
            .fetch_one(&self.pool),
        )
        .await
        .map_err(not_found_on_missing_row)
    }
}

#[async_trait]
impl TokenRepository for PgStore {
    async fn insert(&self, token: &Token) -> Result<(), StoreError> {
        bounded(
            sqlx::query(
                r#"
                INSERT INTO tokens (hash, user_id, expiry, scope)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&token.hash)
            .bind(token.user_id)
            .bind(token.expiry)
            .bind(&token.scope)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: &str, user_id: i64) -> Result<(), StoreError> {
        bounded(
            sqlx::query("DELETE FROM tokens WHERE scope = $1 AND user_id = $2")
                .bind(scope)
                .bind(user_id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}

// These run against a throwaway database created from DATABASE_URL:
// `cargo test -- --ignored` with a reachable PostgreSQL server.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Runtime;
    use crate::models::token::SCOPE_ACTIVATION;
    use crate::storage::apply;

    fn casablanca() -> NewMovie {
        NewMovie {
            title: "Casablanca".to_string(),
            year: 1942,
            runtime: Runtime(102),
            genres: vec!["drama".to_string(), "romance".to_string()],
        }
    }

    fn alice() -> NewUser {
        NewUser {
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "$2b$12$placeholderplaceholderplaceholderplaceholderpl".to_string(),
            activated: false,
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs PostgreSQL at DATABASE_URL"]
    async fn test_stale_writer_gets_conflict(pool: PgPool) {
        let store = PgStore::new(pool);
        let mut movie = MovieRepository::insert(&store, casablanca()).await.unwrap();
        assert_eq!(movie.version, 1);
        apply(&store, &mut movie).await.unwrap();
        apply(&store, &mut movie).await.unwrap();
        assert_eq!(movie.version, 3);

        let mut a: Movie = store.get(movie.id).await.unwrap();
        let mut b: Movie = store.get(movie.id).await.unwrap();

        b.title = "Casablanca (B)".to_string();
        assert_eq!(apply(&store, &mut b).await.unwrap(), 4);

        a.title = "Casablanca (A)".to_string();
        assert!(matches!(
            apply(&store, &mut a).await,
            Err(StoreError::EditConflict)
        ));
        assert_eq!(a.version, 3);

        let stored: Movie = store.get(movie.id).await.unwrap();
        assert_eq!(stored.version, 4);
        assert_eq!(stored.title, "Casablanca (B)");
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs PostgreSQL at DATABASE_URL"]
    async fn test_update_after_delete_is_not_found(pool: PgPool) {
        let store = PgStore::new(pool);
        let mut movie = MovieRepository::insert(&store, casablanca()).await.unwrap();
        MovieRepository::delete(&store, movie.id).await.unwrap();

        assert!(matches!(
            apply(&store, &mut movie).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            MovieRepository::delete(&store, movie.id).await,
            Err(StoreError::NotFound)
        ));
        let missing: Result<Movie, _> = store.get(movie.id).await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs PostgreSQL at DATABASE_URL"]
    async fn test_duplicate_email_is_reported(pool: PgPool) {
        let store = PgStore::new(pool);
        UserRepository::insert(&store, alice()).await.unwrap();

        assert!(matches!(
            UserRepository::insert(&store, alice()).await,
            Err(StoreError::DuplicateEmail)
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs PostgreSQL at DATABASE_URL"]
    async fn test_activation_token_lookup(pool: PgPool) {
        let store = PgStore::new(pool);
        let mut user = UserRepository::insert(&store, alice()).await.unwrap();
        let token = Token::generate(user.id, chrono::Duration::hours(1), SCOPE_ACTIVATION);
        TokenRepository::insert(&store, &token).await.unwrap();

        let found = store
            .get_for_token(SCOPE_ACTIVATION, &token.plaintext)
            .await
            .unwrap();
        assert_eq!(found.id, user.id);

        user.activated = true;
        assert_eq!(apply(&store, &mut user).await.unwrap(), 2);

        store
            .delete_all_for_user(SCOPE_ACTIVATION, user.id)
            .await
            .unwrap();
        assert!(matches!(
            store.get_for_token(SCOPE_ACTIVATION, &token.plaintext).await,
            Err(StoreError::NotFound)
        ));
    }
}
