//! Graph node naming.
//!
//! Sections and variables share one graph, so ids carry a kind prefix.

const SECTION_PREFIX: &str = "section:";
const VAR_PREFIX: &str = "var:";

pub fn section_node(id: &str) -> String {
    format!("{SECTION_PREFIX}{id}")
}

pub fn var_node(name: &str) -> String {
    format!("{VAR_PREFIX}{name}")
}

/// Borrowed view of a node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef<'a> {
    Section(&'a str),
    Variable(&'a str),
    Other(&'a str),
}

impl<'a> NodeRef<'a> {
    pub fn parse(node: &'a str) -> Self {
        if let Some(id) = node.strip_prefix(SECTION_PREFIX) {
            NodeRef::Section(id)
        } else if let Some(name) = node.strip_prefix(VAR_PREFIX) {
            NodeRef::Variable(name)
        } else {
            NodeRef::Other(node)
        }
    }

    pub fn as_section(self) -> Option<&'a str> {
        match self {
            NodeRef::Section(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_variable(self) -> Option<&'a str> {
        match self {
            NodeRef::Variable(name) => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        assert_eq!(NodeRef::parse(&section_node("intro")), NodeRef::Section("intro"));
        assert_eq!(NodeRef::parse(&var_node("price")).as_variable(), Some("price"));
        assert_eq!(NodeRef::parse("A"), NodeRef::Other("A"));
    }
}
