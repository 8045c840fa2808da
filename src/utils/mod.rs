pub mod clock;
pub mod ids;
pub mod retry;

pub use clock::*;
pub use ids::*;
pub use retry::*;
