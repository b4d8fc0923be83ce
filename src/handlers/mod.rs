pub mod health;
pub mod diagnostics;
pub mod presence;

pub use health::*;
pub use diagnostics::*;
pub use presence::*;
