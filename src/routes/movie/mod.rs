mod handler;
mod model;

pub use handler::{create_movie, delete_movie, list_movies, show_movie, update_movie};
pub use model::{
    CreateMovieRequest, DeleteMovieResponse, EXPECTED_VERSION_HEADER, ListMoviesQuery,
    MovieListResponse, MovieResponse, UpdateMovieRequest,
};
