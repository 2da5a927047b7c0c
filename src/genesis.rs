//! Streaming genesis import.

pub mod importer;
pub mod stream;

pub use importer::{GenesisImportError, GenesisImporter, GenesisSummary, GEN_TXS_PATH};
pub use stream::{path_segments, stream_path, GenesisTarget, StreamOutcome};
