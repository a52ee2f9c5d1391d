pub mod ids;
pub mod types;

pub use ids::*;
pub use types::*;
