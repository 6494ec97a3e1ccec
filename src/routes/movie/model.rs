use serde::{Deserialize, Serialize};

use crate::models::movie::MovieFilter;
use crate::models::{Metadata, Movie, Runtime};
use crate::utils::validator::Validator;

/// Optional precondition: the version the client last saw.
pub const EXPECTED_VERSION_HEADER: &str = "x-expected-version";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateMovieRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: i32,
    #[serde(default = "unset_runtime")]
    pub runtime: Runtime,
    #[serde(default)]
    pub genres: Vec<String>,
}

fn unset_runtime() -> Runtime {
    Runtime(0)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMovieRequest {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<Runtime>,
    pub genres: Option<Vec<String>>,
}

impl UpdateMovieRequest {
    pub fn apply_to(self, movie: &mut Movie) {
        if let Some(title) = self.title {
            movie.title = title;
        }
        if let Some(year) = self.year {
            movie.year = year;
        }
        if let Some(runtime) = self.runtime {
            movie.runtime = runtime;
        }
        if let Some(genres) = self.genres {
            movie.genres = genres;
        }
    }
}

/// Raw query string; numbers are parsed by hand so bad input becomes a field
/// error instead of a rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ListMoviesQuery {
    pub title: Option<String>,
    pub genres: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub sort: Option<String>,
}

impl ListMoviesQuery {
    pub fn into_filter(self, v: &mut Validator) -> MovieFilter {
        let defaults = MovieFilter::default();
        MovieFilter {
            title: self.title.unwrap_or_default(),
            genres: self
                .genres
                .filter(|csv| !csv.is_empty())
                .map(|csv| csv.split(',').map(|g| g.trim().to_string()).collect())
                .unwrap_or_default(),
            page: read_int(self.page, "page", defaults.page, v),
            page_size: read_int(self.page_size, "page_size", defaults.page_size, v),
            sort: self
                .sort
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.sort),
        }
    }
}

fn read_int(raw: Option<String>, key: &str, default: i64, v: &mut Validator) -> i64 {
    match raw.filter(|s| !s.is_empty()) {
        None => default,
        Some(s) => s.parse().unwrap_or_else(|_| {
            v.add_error(key, "must be an integer value");
            default
        }),
    }
}

#[derive(Debug, Serialize)]
pub struct MovieResponse {
    pub movie: Movie,
}

#[derive(Debug, Serialize)]
pub struct MovieListResponse {
    pub movies: Vec<Movie>,
    pub metadata: Metadata,
}

#[derive(Debug, Serialize)]
pub struct DeleteMovieResponse {
    pub message: String,
}
