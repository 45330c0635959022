pub mod autocomplete;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod messages;
pub mod room;

pub use autocomplete::*;
pub use diagnostics::*;
pub use error::*;
pub use health::*;
pub use messages::*;
pub use room::*;
