pub mod movie;
pub mod token;
pub mod user;

pub use movie::{Metadata, Movie, MovieFilter, NewMovie, Runtime};
pub use token::Token;
pub use user::{NewUser, User};
