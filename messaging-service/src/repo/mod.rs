pub mod channel_repo;
pub mod message_repo;
pub mod template_repo;
