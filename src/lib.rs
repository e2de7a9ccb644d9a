pub mod campaign;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod mailer;

pub use error::Error;
