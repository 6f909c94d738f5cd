//! # pos-admin
//!
//! HTTP admission layer and security admin API for the POS backend.
//!
//! Wraps axum routes in the `pos-guard` admission pipeline, records
//! rejections and suspicious traffic through `pos-audit`, and serves the
//! operator endpoints for statistics and manual blocking.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pos_admin::{AdminConfig, AdminServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = AdminServer::from_config(AdminConfig::default()).unwrap();
//!     // server.serve("0.0.0.0:3000".parse().unwrap()).await.unwrap();
//! }
//! ```
//!
//! ## API Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/health` | GET | Liveness and uptime |
//! | `/admin/security/stats` | GET | Attack statistics for the last `hours` |
//! | `/admin/security/block-ip` | POST | Block an IPv4 address |
//! | `/admin/security/unblock-ip` | POST | Remove a block |
//! | `/admin/security/blocked-ips` | GET | List blocked addresses |
//! | `/admin/security/cleanup` | POST | Apply attack log retention |
//! | `/admin/security/request-info` | GET | Echo the request as seen by the server |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;
pub mod validation;

// Re-export main types
pub use cli::Cli;
pub use config::AdminConfig;
pub use error::{AdminError, AdminResult};
pub use middleware::{ClientIdentity, PeerAddr};
pub use routes::{create_router, protect};
pub use server::AdminServer;
pub use state::AppState;
