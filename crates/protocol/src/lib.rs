pub mod crypto;
pub mod election;
pub mod error;
pub mod frame;
pub mod messages;
pub mod rate_limit;
pub mod session_settings;

pub use crypto::*;
pub use election::*;
pub use error::*;
pub use frame::*;
pub use messages::*;
pub use rate_limit::*;
pub use session_settings::*;
