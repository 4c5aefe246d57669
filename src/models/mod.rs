pub mod query;
pub mod record;
pub mod storage;

pub use query::*;
pub use record::*;
pub use storage::*;
