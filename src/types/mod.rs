mod file;
mod grant;
mod models;
mod session;

pub use file::*;
pub use grant::*;
pub use models::*;
pub use session::*;
