pub mod review;
pub mod classification;
pub mod report;

pub use review::*;
pub use classification::*;
pub use report::*;
