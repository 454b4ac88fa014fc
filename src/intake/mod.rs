pub mod audit;
pub mod checklist;
pub mod classifier;
pub mod classify;
pub mod config;
pub mod content_store;
pub mod dossier;
pub mod ingest;
pub mod links;
pub mod model;
pub mod paths;
pub mod pipeline;
pub mod prefilter;
pub mod reply;
pub mod retention;
pub mod router;
pub mod runtime;
pub mod spool;
pub mod store;
pub mod util;
pub mod warn;

#[cfg(test)]
pub mod testkit;
