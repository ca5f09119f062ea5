pub mod metadata;
pub mod request;
pub mod result;

pub use metadata::*;
pub use request::*;
pub use result::*;
