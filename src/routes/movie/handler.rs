use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;

use crate::{
    AppState,
    error::AppError,
    models::{NewMovie, movie::validate_movie},
    routes::parse_id,
    storage::apply,
    utils::{success_to_api_response, validator::Validator},
};

use super::model::{
    CreateMovieRequest, DeleteMovieResponse, EXPECTED_VERSION_HEADER, ListMoviesQuery,
    MovieListResponse, MovieResponse, UpdateMovieRequest,
};

pub async fn create_movie(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<CreateMovieRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let mut v = Validator::new();
    validate_movie(&mut v, &req.title, req.year, req.runtime, &req.genres);
    v.into_result()?;

    let movie = state
        .movies
        .insert(NewMovie {
            title: req.title,
            year: req.year,
            runtime: req.runtime,
            genres: req.genres,
        })
        .await?;

    let mut headers = HeaderMap::new();
    let location = format!("/v1/movies/{}", movie.id);
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&location).map_err(AppError::internal)?,
    );

    Ok((
        StatusCode::CREATED,
        headers,
        success_to_api_response(MovieResponse { movie }),
    ))
}

pub async fn show_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    let movie = state.movies.get(id).await?;
    Ok((StatusCode::OK, success_to_api_response(MovieResponse { movie })))
}

pub async fn update_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    WithRejection(Json(req), _): WithRejection<Json<UpdateMovieRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    let mut movie = state.movies.get(id).await?;

    if let Some(expected) = headers.get(EXPECTED_VERSION_HEADER) {
        let matches = expected
            .to_str()
            .ok()
            .and_then(|raw| raw.trim().parse::<i32>().ok())
            .is_some_and(|version| version == movie.version);
        if !matches {
            return Err(AppError::EditConflict);
        }
    }

    req.apply_to(&mut movie);

    let mut v = Validator::new();
    validate_movie(&mut v, &movie.title, movie.year, movie.runtime, &movie.genres);
    v.into_result()?;

    apply(state.movies.as_ref(), &mut movie).await?;

    Ok((StatusCode::OK, success_to_api_response(MovieResponse { movie })))
}

pub async fn delete_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    state.movies.delete(id).await?;
    Ok((
        StatusCode::OK,
        success_to_api_response(DeleteMovieResponse {
            message: "movie successfully deleted".to_string(),
        }),
    ))
}

pub async fn list_movies(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<ListMoviesQuery>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let mut v = Validator::new();
    let filter = query.into_filter(&mut v);
    filter.validate(&mut v);
    v.into_result()?;

    let (movies, metadata) = state.movies.list(&filter).await?;
    Ok((
        StatusCode::OK,
        success_to_api_response(MovieListResponse { movies, metadata }),
    ))
}
