//! Fetch orchestration over several AORs

pub mod aggregator;
pub mod recursive;

pub use aggregator::Aggregator;
pub use recursive::RecursiveResolver;
