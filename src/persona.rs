use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, Result};

pub const DEFAULT_PERSONA_ID: &str = "default";

/// A bias profile applied to the personalization pass only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub role: String,
    pub context: String,
}

impl Persona {
    pub fn new(name: &str, role: &str, context: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            role: role.to_string(),
            context: context.to_string(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_PERSONA_ID
    }

    /// Persona line injected into the personalization prompt
    pub fn blurb(&self) -> String {
        if self.is_default() {
            "General User".to_string()
        } else {
            format!("{} ({})", self.role, self.context)
        }
    }
}

pub fn default_persona() -> Persona {
    Persona {
        id: DEFAULT_PERSONA_ID.to_string(),
        name: "Default".to_string(),
        role: "General User".to_string(),
        context: "Standard responses.".to_string(),
    }
}

pub fn builtin_personas() -> Vec<Persona> {
    vec![
        default_persona(),
        Persona {
            id: "dev".to_string(),
            name: "Developer".to_string(),
            role: "Software Engineer".to_string(),
            context: "Prefer technical, code-heavy, and concise responses.".to_string(),
        },
        Persona {
            id: "creative".to_string(),
            name: "Creative".to_string(),
            role: "Writer".to_string(),
            context: "Use vivid language, metaphors, and elaborated explanations.".to_string(),
        },
    ]
}

/// The persona list together with the active selection.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaSet {
    personas: Vec<Persona>,
    active_id: String,
}

impl Default for PersonaSet {
    fn default() -> Self {
        Self::new(builtin_personas(), None)
    }
}

impl PersonaSet {
    /// Restore a saved list; the default persona is always present.
    pub fn new(mut personas: Vec<Persona>, active_id: Option<String>) -> Self {
        if !personas.iter().any(Persona::is_default) {
            personas.insert(0, default_persona());
        }
        let active_id = active_id
            .filter(|id| personas.iter().any(|p| &p.id == id))
            .unwrap_or_else(|| DEFAULT_PERSONA_ID.to_string());
        Self { personas, active_id }
    }

    pub fn all(&self) -> &[Persona] {
        &self.personas
    }

    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    pub fn active(&self) -> Persona {
        self.personas
            .iter()
            .find(|p| p.id == self.active_id)
            .cloned()
            .unwrap_or_else(default_persona)
    }

    pub fn add(&mut self, name: &str, role: &str, context: &str) -> Result<Persona> {
        if name.trim().is_empty() {
            return Err(ChatError::Validation("Persona name cannot be empty".to_string()));
        }
        let persona = Persona::new(name.trim(), role.trim(), context.trim());
        self.personas.push(persona.clone());
        Ok(persona)
    }

    pub fn set_active(&mut self, id: &str) -> Result<()> {
        if !self.personas.iter().any(|p| p.id == id) {
            return Err(ChatError::NotFound(format!("Persona {}", id)));
        }
        self.active_id = id.to_string();
        Ok(())
    }

    /// Delete a persona. Deleting the active one falls back to the default.
    pub fn delete(&mut self, id: &str) -> Result<()> {
        if id == DEFAULT_PERSONA_ID {
            return Err(ChatError::Validation(
                "The default persona cannot be deleted".to_string(),
            ));
        }
        let index = self
            .personas
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| ChatError::NotFound(format!("Persona {}", id)))?;
        self.personas.remove(index);

        if self.active_id == id {
            self.active_id = DEFAULT_PERSONA_ID.to_string();
        }
        Ok(())
    }
}
