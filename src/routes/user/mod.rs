mod handler;
mod model;

pub use handler::{activate_user, register_user};
pub use model::{ActivateUserRequest, RegisterUserRequest, UserResponse};
