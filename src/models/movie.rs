use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use sqlx::FromRow;

use crate::storage::Versioned;
use crate::utils::validator::{Validator, permitted_value, unique};

/// Running time in minutes, rendered as `"<n> mins"` in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(transparent)]
pub struct Runtime(pub i32);

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mins", self.0)
    }
}

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let minutes = raw
            .strip_suffix(" mins")
            .and_then(|n| n.parse::<i32>().ok())
            .ok_or_else(|| de::Error::custom("invalid runtime format"))?;
        Ok(Runtime(minutes))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Movie {
    pub id: i64,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub year: i32,
    #[serde(skip_serializing_if = "is_zero_runtime")]
    pub runtime: Runtime,
    pub genres: Vec<String>,
    pub version: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

fn is_zero_runtime(runtime: &Runtime) -> bool {
    runtime.0 == 0
}

impl Versioned for Movie {
    fn id(&self) -> i64 {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn set_version(&mut self, version: i32) {
        self.version = version;
    }
}

/// Fields a client supplies when creating a movie.
#[derive(Debug, Clone)]
pub struct NewMovie {
    pub title: String,
    pub year: i32,
    pub runtime: Runtime,
    pub genres: Vec<String>,
}

pub fn validate_movie(
    v: &mut Validator,
    title: &str,
    year: i32,
    runtime: Runtime,
    genres: &[String],
) {
    v.check(!title.is_empty(), "title", "must be provided");
    v.check(title.len() <= 500, "title", "must not be more than 500 bytes long");

    v.check(year != 0, "year", "must be provided");
    v.check(year >= 1888, "year", "must be greater than 1888");
    v.check(year <= Utc::now().year(), "year", "must not be in the future");

    v.check(runtime.0 != 0, "runtime", "must be provided");
    v.check(runtime.0 > 0, "runtime", "must be a positive integer");

    v.check(!genres.is_empty(), "genres", "must contain at least 1 genre");
    v.check(genres.len() <= 5, "genres", "must not contain more than 5 genres");
    v.check(unique(genres), "genres", "must not contain duplicate values");
}

pub const SORT_SAFELIST: [&str; 8] = [
    "id", "title", "year", "runtime", "-id", "-title", "-year", "-runtime",
];

/// Search, sort and paging parameters for listing movies.
#[derive(Debug, Clone)]
pub struct MovieFilter {
    pub title: String,
    pub genres: Vec<String>,
    pub page: i64,
    pub page_size: i64,
    pub sort: String,
}

impl Default for MovieFilter {
    fn default() -> Self {
        Self {
            title: String::new(),
            genres: Vec::new(),
            page: 1,
            page_size: 20,
            sort: "id".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Id,
    Title,
    Year,
    Runtime,
}

impl SortColumn {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortColumn::Id => "id",
            SortColumn::Title => "title",
            SortColumn::Year => "year",
            SortColumn::Runtime => "runtime",
        }
    }
}

impl MovieFilter {
    pub fn validate(&self, v: &mut Validator) {
        v.check(self.page > 0, "page", "must be greater than zero");
        v.check(self.page <= 10_000_000, "page", "must be a maximum of 10 million");
        v.check(self.page_size > 0, "page_size", "must be greater than zero");
        v.check(self.page_size <= 100, "page_size", "must be a maximum of 100");
        v.check(
            permitted_value(&self.sort.as_str(), &SORT_SAFELIST),
            "sort",
            "invalid sort value",
        );
    }

    /// Falls back to `id` for anything outside the safelist; callers validate
    /// first.
    pub fn sort_column(&self) -> SortColumn {
        match self.sort.trim_start_matches('-') {
            "title" => SortColumn::Title,
            "year" => SortColumn::Year,
            "runtime" => SortColumn::Runtime,
            _ => SortColumn::Id,
        }
    }

    pub fn descending(&self) -> bool {
        self.sort.starts_with('-')
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub current_page: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub page_size: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub first_page: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub last_page: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub total_records: i64,
}

fn is_zero_i64(n: &i64) -> bool {
    *n == 0
}

impl Metadata {
    pub fn calculate(total_records: i64, page: i64, page_size: i64) -> Self {
        if total_records == 0 {
            return Metadata::default();
        }
        Metadata {
            current_page: page,
            page_size,
            first_page: 1,
            last_page: (total_records + page_size - 1) / page_size,
            total_records,
        }
    }
}
