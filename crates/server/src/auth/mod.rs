//! Users, password hashing and cookie/bearer sessions.

pub mod password;
pub mod session;
pub mod users;

pub use session::SessionService;
pub use users::{NewUser, UserDto, UserUpdate, UsersService};
