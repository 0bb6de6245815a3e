#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod graph;
pub mod hasher;
pub mod interpolation;
pub mod runtime;
pub mod sections;
pub mod session;
pub mod updates;
pub mod vars;

mod sync;

pub use session::{CampaignReport, CampaignSession, SessionError, TemplateIssue};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
