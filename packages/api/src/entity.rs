pub mod audit_log;
pub mod prediction;
pub mod user;

pub mod prelude {
    pub use super::audit_log::Entity as AuditLog;
    pub use super::prediction::Entity as Prediction;
    pub use super::user::Entity as User;
}
