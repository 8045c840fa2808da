pub mod accounts;
pub mod generator;
pub mod image_store;
pub mod ledger;
pub mod metrics;
pub mod redis;

pub use self::accounts::*;
pub use self::generator::*;
pub use self::image_store::*;
pub use self::ledger::*;
pub use self::metrics::*;
pub use self::redis::*;
