pub mod charts;
pub mod coerce;
pub mod ingest;
pub mod summary;
pub mod table;
