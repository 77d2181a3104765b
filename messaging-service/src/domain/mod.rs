pub mod channel;
pub mod error;
pub mod events;
pub mod message;
pub mod template;

pub use error::DomainError;
