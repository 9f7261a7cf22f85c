use crate::error::{CaptionError, Result};
use crate::types::PromptTemplate;

pub const DEFAULT_TEMPLATE_ID: &str = "default";

const DEFAULT_TEMPLATE_CONTENT: &str = "I want you to create captions for the provided images. Focusing ONLY on what you can directly observe in the image. Follow these strict guidelines:

1. Describe the building, its location, and visible surroundings using ONLY factual, objective terms.
2. State the weather conditions visible in the image without interpretation.
3. Describe any visible street-level activity or urban elements factually.
4. If present, describe the geometric facade of the building in detail, focusing on its observable features.
5. DO NOT use subjective or interpretive language like \"striking\", \"beautiful\", \"serene\", \"inviting\" or similar.
6. DO NOT make assumptions about atmosphere, feelings, or anything not directly visible in the image.
7. DO NOT use flowery or poetic language. Stick to clear, factual descriptions.
8. Focus solely on what is visible - do not invent or imagine elements not shown in the image. Caption the new image using ONLY objective, factual descriptions of what you can directly observe. Do not use any subjective or interpretive language. Describe the image as if you are a camera, not a poet or storyteller.";

/// The built-in template used when the backend has none.
pub fn default_template() -> PromptTemplate {
    PromptTemplate {
        id: DEFAULT_TEMPLATE_ID.to_string(),
        name: "Default Template".to_string(),
        content: DEFAULT_TEMPLATE_CONTENT.to_string(),
        is_default: true,
    }
}

/// Local view of the prompt templates with exactly one active template.
///
/// The active id always names a template in the library.
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    templates: Vec<PromptTemplate>,
    active_id: String,
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl TemplateLibrary {
    /// The first template becomes active; an empty list gets the built-in default.
    pub fn new(mut templates: Vec<PromptTemplate>) -> Self {
        if templates.is_empty() {
            templates.push(default_template());
        }
        let active_id = templates[0].id.clone();
        Self {
            templates,
            active_id,
        }
    }

    pub fn templates(&self) -> &[PromptTemplate] {
        &self.templates
    }

    pub fn active(&self) -> &PromptTemplate {
        // The library is never empty and `active_id` is kept valid.
        self.get(&self.active_id).unwrap_or(&self.templates[0])
    }

    pub fn get(&self, id: &str) -> Option<&PromptTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn set_active(&mut self, id: &str) -> Result<()> {
        if self.get(id).is_none() {
            return Err(CaptionError::Other(format!("Template not found: {}", id)));
        }
        self.active_id = id.to_string();
        Ok(())
    }

    /// Add a template saved by the backend and make it active.
    pub fn insert(&mut self, saved: PromptTemplate) {
        self.active_id = saved.id.clone();
        match self.templates.iter_mut().find(|t| t.id == saved.id) {
            Some(existing) => *existing = saved,
            None => self.templates.push(saved),
        }
    }

    /// Replace a template by id. Returns false if it is unknown.
    pub fn replace(&mut self, updated: PromptTemplate) -> bool {
        match self.templates.iter_mut().find(|t| t.id == updated.id) {
            Some(existing) => {
                *existing = updated;
                true
            }
            None => false,
        }
    }

    /// Remove a template after the backend confirmed the delete.
    ///
    /// Deleting the active template falls back to the default template,
    /// restoring the built-in one if no default remains.
    pub fn remove(&mut self, id: &str) -> Option<PromptTemplate> {
        let idx = self.templates.iter().position(|t| t.id == id)?;
        let removed = self.templates.remove(idx);

        if self.active_id == id || self.templates.is_empty() {
            let fallback = match self.templates.iter().find(|t| t.is_default) {
                Some(t) => t.id.clone(),
                None => {
                    let builtin = default_template();
                    let builtin_id = builtin.id.clone();
                    if self.get(&builtin_id).is_none() {
                        self.templates.push(builtin);
                    }
                    builtin_id
                }
            };
            self.active_id = fallback;
        }
        Some(removed)
    }
}
