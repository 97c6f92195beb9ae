pub mod analyzer;
pub mod cache;
pub mod fingerprint;
pub mod writer;

pub use analyzer::BatchAnalyzer;
pub use cache::ClassificationCache;
pub use fingerprint::Fingerprint;
pub use writer::ResultWriter;
