pub mod cmd;
pub mod conllu;
pub mod constraints;
pub mod error;
pub mod index;
pub mod model;
pub mod shard;
pub mod views;

pub use constraints::{Condition, Criterion, Filter, Op, Scope};
pub use error::{Error, Result};
pub use index::{DecafIndex, IngestConfig, IngestStats};
pub use views::OutputLevel;
