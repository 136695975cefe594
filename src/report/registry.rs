//! Section registry: per-report map of section id to status and content.
//!
//! Pure data, no I/O. Two rules are enforced here rather than by callers:
//! content only arrives together with the transition into `Ready`, and a
//! transition into `Error` keeps whatever content was cached before.

use std::collections::HashMap;

use super::types::{Section, SectionId, SectionSeed, SectionStatus};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown section: {0}")]
    UnknownSection(SectionId),
    #[error("Duplicate section id: {0}")]
    DuplicateSection(SectionId),
    #[error("Section {0} has no content to mark ready")]
    MissingContent(SectionId),
}

/// Sections of one open report, in display order.
#[derive(Debug, Default, Clone)]
pub struct SectionRegistry {
    sections: Vec<Section>,
    index: HashMap<SectionId, usize>,
}

impl SectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all sections. Seeds carrying content start `Ready`.
    pub fn initialize(
        &mut self,
        seeds: impl IntoIterator<Item = SectionSeed>,
    ) -> Result<(), RegistryError> {
        let mut sections = Vec::new();
        let mut index = HashMap::new();

        for seed in seeds {
            if index.contains_key(&seed.id) {
                return Err(RegistryError::DuplicateSection(seed.id));
            }
            index.insert(seed.id.clone(), sections.len());
            let status = if seed.content.is_some() {
                SectionStatus::Ready
            } else {
                SectionStatus::Empty
            };
            sections.push(Section {
                id: seed.id,
                title: seed.title,
                content: seed.content,
                status,
            });
        }

        self.sections = sections;
        self.index = index;
        Ok(())
    }

    pub fn get(&self, id: &SectionId) -> Result<&Section, RegistryError> {
        self.index
            .get(id)
            .map(|&i| &self.sections[i])
            .ok_or_else(|| RegistryError::UnknownSection(id.clone()))
    }

    /// Change status without touching content.
    ///
    /// `Ready` is refused unless content is already cached; new content goes
    /// through [`set_content`](Self::set_content).
    pub fn set_status(&mut self, id: &SectionId, status: SectionStatus) -> Result<(), RegistryError> {
        let section = self.get_mut(id)?;
        if status == SectionStatus::Ready && section.content.is_none() {
            return Err(RegistryError::MissingContent(id.clone()));
        }
        section.status = status;
        Ok(())
    }

    /// Store fresh content and mark the section `Ready`.
    pub fn set_content(&mut self, id: &SectionId, content: impl Into<String>) -> Result<(), RegistryError> {
        let section = self.get_mut(id)?;
        section.content = Some(content.into());
        section.status = SectionStatus::Ready;
        Ok(())
    }

    /// All sections in initialization order.
    pub fn snapshot(&self) -> Vec<Section> {
        self.sections.clone()
    }

    pub fn ids(&self) -> impl Iterator<Item = &SectionId> {
        self.sections.iter().map(|s| &s.id)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn clear(&mut self) {
        self.sections.clear();
        self.index.clear();
    }

    fn get_mut(&mut self, id: &SectionId) -> Result<&mut Section, RegistryError> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.sections[i]),
            None => Err(RegistryError::UnknownSection(id.clone())),
        }
    }
}
