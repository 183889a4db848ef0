pub mod alignment;
pub mod symbol;
pub mod types;

pub use alignment::*;
pub use symbol::*;
pub use types::*;
