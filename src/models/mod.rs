pub mod account;
pub mod credits;
pub mod image;

pub use account::*;
pub use credits::*;
pub use image::*;
