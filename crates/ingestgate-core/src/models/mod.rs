pub mod scan;
pub mod upload;

pub use scan::*;
pub use upload::*;
