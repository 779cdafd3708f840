//! Strike Pipeline - decoding, storage and proximity queries for lightning data
//!
//! This library is shared by the ingest and API services. It handles:
//!
//! - Reversing the feed's byte-substitution obfuscation
//! - Tolerant field extraction and longitude repair
//! - Coordinate validation
//! - PostgreSQL persistence of strikes and ingestion counters
//! - Radius queries with an exact great-circle filter
//!
//! # Example
//!
//! ```rust,no_run
//! use strike_pipeline::{DatabaseConfig, StrikeDecoder, StrikeSink, StrikeStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = StrikeStore::connect_with_retry(&DatabaseConfig::default()).await?;
//!     store.run_migrations().await?;
//!
//!     let mut decoder = StrikeDecoder::new();
//!     let strike = decoder.decode(br#"{"time":1700000000,"lat":45.2,"lon":16.04}"#)?;
//!     store.insert_strike(&strike).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod extractor;
pub mod frame_decoder;
pub mod proximity;
pub mod record;
pub mod store;
pub mod strike_decoder;
pub mod validator;

// Re-export main types
pub use config::{ConfigError, DatabaseConfig};
pub use extractor::{normalize_timestamp, repair_longitude, ExtractionError, FieldExtractor};
pub use frame_decoder::FrameDecoder;
pub use proximity::{
    find_nearby, haversine_km, rank_by_distance, BoundingBox, NearbyQuery, NearbyStrike,
};
pub use record::{
    success_rate, GeoPoint, IngestionDelta, IngestionStats, NewStrike, StrikeRecord, StrikeStats,
    TimeWindow,
};
pub use store::{StoreError, StrikeQuery, StrikeSink, StrikeSource, StrikeStore};
pub use strike_decoder::{DecoderStats, FrameRejection, StrikeDecoder};
pub use validator::{validate, ValidationError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::record::{IngestionDelta, NewStrike, StrikeRecord};
    pub use crate::store::{StrikeSink, StrikeSource, StrikeStore};
    pub use crate::strike_decoder::{FrameRejection, StrikeDecoder};
}
