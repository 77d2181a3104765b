pub mod api_key_repo;
pub mod organization_repo;
pub mod refresh_token_repo;
pub mod role_repo;
pub mod single_use_token_repo;
pub mod user_repo;
