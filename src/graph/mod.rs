//! Graph layer: typed node view over the host's prompt, plus the job
//! metadata extractor built on it.

pub mod extract;
pub mod node;

pub use extract::{ExtractedRecord, extract_record};
pub use node::ExecutionGraph;
