pub mod generator;
pub mod outline;
pub mod worker;

pub use outline::{flatten_outline, parse_outline, FlatItem, OutlineNode};
pub use worker::ContentWorker;
