mod authenticate;
pub mod helpers;
mod middleware;
mod password;
mod session;
mod token;

pub use authenticate::{
    AuthFailure, Authenticator, DirectoryAuthenticator, DirectoryError, NoDirectory,
};
pub use middleware::{
    AuthError, Download, FileManager, Logout, Module, NextToken, Profile, RequireSession,
    carry_session_token,
};
pub use password::PasswordHasher;
pub use session::{Revoke, SessionCheck, SessionManager};
pub use token::SessionToken;
