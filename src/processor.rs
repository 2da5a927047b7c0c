//! Orchestration: the supervised indexer loop, prefetching, ordered
//! transactional dispatch, event planning, periodic triggers, chain queries,
//! tip tracking and restart backoff.

pub mod backoff;
pub mod decoders;
pub mod dispatch;
pub mod indexer;
pub mod lifecycle;
pub mod periodic;
pub mod plan;
pub mod prefetch;
pub mod query;
pub mod tip;


pub use decoders::MessageDecoders;
pub use indexer::Indexer;
pub use query::ChainQuery;
