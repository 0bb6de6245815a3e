//! Section model and campaign documents.

mod document;
mod set;
mod types;

pub use document::{CampaignDocument, DocumentError};
pub use set::SectionSet;
pub use types::{OutputDecl, Section, SectionError, SectionKind};
