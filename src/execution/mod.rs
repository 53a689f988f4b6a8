pub mod result;
pub mod sqlite;

pub use result::*;
pub use sqlite::*;
