mod account;
pub mod dto;
mod files;
pub mod response;
mod router;
pub mod validation;

pub use account::account_router;
pub use files::files_router;
pub use router::{AppState, create_router};
