pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod module;
pub mod types;

pub use audit::{AuditEvent, AuditRecorder, LogRecorder, NullRecorder};
pub use auth::{Actor, ActorPermissions, AllowAll, Authorizer, DenyAll, require};
pub use config::ServiceConfig;
pub use error::ServiceError;
pub use module::Module;
pub use types::{ListResult, new_id, now_rfc3339};
