// Expense pipeline: resolve, download, normalize, enrich, aggregate, load

pub mod aggregate;
pub mod cache;
pub mod catalog;
pub mod context;
pub mod download;
pub mod enrich;
pub mod export;
pub mod formats;
pub mod normalize;
pub mod registry;
pub mod run;

pub use context::RunContext;
pub use run::{Pipeline, RunSummary};
