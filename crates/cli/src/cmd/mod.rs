pub mod check;
pub mod eval;
pub mod impact;
pub mod order;
pub mod output;
pub mod render;

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use flowvars_core::CampaignSession;
use flowvars_core::config::EngineConfig;
use flowvars_core::sections::CampaignDocument;
use serde_json::Value;
use tracing::debug;

/// Parse `name=value`. The value is read as JSON when it parses as JSON
/// (`10`, `true`, `[1,2]`), otherwise it is taken as a plain string.
pub fn parse_assignment(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s.split_once('=').ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let name = name.trim().trim_start_matches('@');
    if name.is_empty() {
        return Err(format!("missing variable name in '{s}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

/// Load a campaign and open a session over it, with `sets` layered over the
/// document's own values.
pub fn open_session(config: EngineConfig, path: &Path, sets: Vec<(String, Value)>) -> Result<CampaignSession> {
    let mut doc = CampaignDocument::load(path)?;
    debug!(campaign = %path.display(), sections = doc.sections.len(), overrides = sets.len(), "opening campaign");
    doc.values.extend(sets);
    CampaignSession::from_document(config, &doc)
        .wrap_err_with(|| format!("campaign {} was rejected", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("price=10").unwrap(), ("price".into(), json!(10)));
        assert_eq!(parse_assignment("@vip=true").unwrap(), ("vip".into(), json!(true)));
        assert_eq!(parse_assignment("name=Ada Lovelace").unwrap(), ("name".into(), json!("Ada Lovelace")));
        assert_eq!(parse_assignment("code=\"007\"").unwrap(), ("code".into(), json!("007")));
        assert_eq!(parse_assignment("empty=").unwrap(), ("empty".into(), json!("")));
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=5").is_err());
    }
}
