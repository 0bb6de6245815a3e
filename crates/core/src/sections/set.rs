use std::collections::HashMap;

use super::types::{Section, SectionError};

/// Sections of one campaign in display order.
#[derive(Debug, Clone, Default)]
pub struct SectionSet {
    order: Vec<String>,
    by_id: HashMap<String, Section>,
}

impl SectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at `index` (clamped), or append when `None`.
    pub fn insert(&mut self, section: Section, index: Option<usize>) -> Result<(), SectionError> {
        if self.by_id.contains_key(&section.id) {
            return Err(SectionError::DuplicateSection(section.id));
        }
        let at = index.unwrap_or(self.order.len()).min(self.order.len());
        self.order.insert(at, section.id.clone());
        self.by_id.insert(section.id.clone(), section);
        Ok(())
    }

    /// Swap in a new definition under the same id, keeping its position.
    pub fn replace(&mut self, section: Section) -> Result<Section, SectionError> {
        match self.by_id.get_mut(&section.id) {
            Some(slot) => Ok(std::mem::replace(slot, section)),
            None => Err(SectionError::NotFound(section.id)),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Section> {
        let section = self.by_id.remove(id)?;
        self.order.retain(|s| s != id);
        Some(section)
    }

    pub fn move_to(&mut self, id: &str, index: usize) -> Result<(), SectionError> {
        let from = self.position(id).ok_or_else(|| SectionError::NotFound(id.to_string()))?;
        let moved = self.order.remove(from);
        let at = index.min(self.order.len());
        self.order.insert(at, moved);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Section> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.order.iter().position(|s| s == id)
    }

    /// Section producing `variable`, if any.
    pub fn producer_of(&self, variable: &str) -> Option<&Section> {
        self.iter().find(|s| s.outputs().iter().any(|o| o.name == variable))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
