//! # KBasix
//!
//! A self-hosted file sharing server: accounts with confirmation and
//! password reset, session tokens, per-user quotas and file sharing with
//! accounts, groups, every local account or the world. Usable both as a
//! standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! kbasix = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kbasix::auth::NoDirectory;
//! use kbasix::cms::Cms;
//! use kbasix::config::Config;
//! use kbasix::mail::LogMailer;
//! use kbasix::server::{AppState, create_router};
//!
//! let cms = Cms::open(Config::default(), Arc::new(LogMailer), Arc::new(NoDirectory)).unwrap();
//! let router = create_router(Arc::new(AppState::new(cms)));
//! // Serve with axum, using `into_make_service_with_connect_info::<SocketAddr>()`
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes the admin CLI module. Disable with `default-features = false`.

pub mod accounts;
pub mod auth;
#[cfg(feature = "cli")]
pub mod cli;
pub mod cms;
pub mod config;
pub mod error;
pub mod files;
pub mod mail;
pub mod server;
pub mod sharing;
pub mod store;
pub mod template;
pub mod types;
