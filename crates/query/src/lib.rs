//! Query planner and executor (§4.4), plus the bulk-ingest line parser
//! (§4.12).

#![warn(missing_docs)]

pub mod closest;
pub mod collapse;
pub mod executor;
pub mod filter;
pub mod ingest;
pub mod params;
pub mod planner;
pub mod serialize;

pub use executor::{execute, QueryResult};
pub use filter::Filter;
pub use ingest::{bulk_delete, bulk_ingest, parse_cdx_line, BadLinesMode, IngestLine, IngestLineError, IngestOutcome, SkippedLine};
pub use params::{parse_query, CollapseKeep, CollapseSpec, MatchType, OutputFormat, QueryParams, SortMode};
