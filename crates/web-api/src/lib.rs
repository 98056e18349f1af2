//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给应用层的用例服务。

mod auth;
mod error;
mod message_routes;
mod presence_routes;
mod routes;
mod state;
mod upload_routes;
mod websocket;

pub use auth::{AuthUser, Claims, JwtService};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
pub use websocket::{ClientFrame, ServerFrame};
