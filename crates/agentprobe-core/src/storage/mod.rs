pub mod schema;
pub mod sink;
pub mod store;

pub use sink::{JobSubmitted, ResultSink};
pub use store::{JobSummary, Store};
