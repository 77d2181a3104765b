pub mod context;
pub mod error;
pub mod roles;

pub use context::{SecurityContext, SecurityCtxExtractor};
pub use error::SecurityError;
pub use roles::{ensure_role, ensure_any_role, Role};
