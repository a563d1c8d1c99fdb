//! Persona catalog: named content voices with their topic lists.
//!
//! The catalog is static configuration. It is loaded from a JSON file when
//! `PERSONA_CATALOG_PATH` is set and falls back to the built-in catalog
//! otherwise. Validation happens once, at load time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::ConfigError;

/// A content voice
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    pub key: String,
    pub display_name: String,
    pub topics: Vec<String>,
    /// Relative weight for weighted-random selection
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Whether this persona may produce threads
    #[serde(default)]
    pub thread_capable: bool,
    /// Lexical markers used by the quality gate's persona-fit score
    #[serde(default)]
    pub markers: Vec<String>,
    /// Category label recorded on threads
    #[serde(default)]
    pub category: Option<String>,
}

fn default_weight() -> u32 {
    1
}

/// Validated, immutable persona catalog
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    order: Vec<String>,
    personas: HashMap<String, Persona>,
}

impl PersonaCatalog {
    /// Build a catalog, rejecting empty catalogs and personas without topics.
    pub fn new(personas: Vec<Persona>) -> Result<Self, ConfigError> {
        if personas.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }

        let mut order = Vec::with_capacity(personas.len());
        let mut map = HashMap::with_capacity(personas.len());
        for persona in personas {
            if persona.topics.iter().all(|t| t.trim().is_empty()) {
                return Err(ConfigError::PersonaWithoutTopics(persona.key));
            }
            if map.contains_key(&persona.key) {
                return Err(ConfigError::Catalog(format!(
                    "duplicate persona key '{}'",
                    persona.key
                )));
            }
            order.push(persona.key.clone());
            map.insert(persona.key.clone(), persona);
        }

        Ok(Self {
            order,
            personas: map,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let personas: Vec<Persona> =
            serde_json::from_str(json).map_err(|e| ConfigError::Catalog(e.to_string()))?;
        Self::new(personas)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Catalog(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn get(&self, key: &str) -> Option<&Persona> {
        self.personas.get(key)
    }

    /// Persona keys in catalog order
    pub fn keys(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Catalog shipped with the binary.
    pub fn builtin() -> Self {
        let personas = vec![
            Persona {
                key: "analyst".into(),
                display_name: "The Analyst".into(),
                topics: vec![
                    "market structure".into(),
                    "on-chain metrics".into(),
                    "macro trends".into(),
                    "risk management".into(),
                ],
                weight: 3,
                thread_capable: true,
                markers: vec![
                    "data".into(),
                    "chart".into(),
                    "trend".into(),
                    "%".into(),
                    "signal".into(),
                ],
                category: Some("analysis".into()),
            },
            Persona {
                key: "educator".into(),
                display_name: "The Educator".into(),
                topics: vec![
                    "beginner fundamentals".into(),
                    "common mistakes".into(),
                    "security basics".into(),
                ],
                weight: 2,
                thread_capable: true,
                markers: vec![
                    "learn".into(),
                    "step".into(),
                    "why".into(),
                    "how".into(),
                    "tip".into(),
                ],
                category: Some("education".into()),
            },
            Persona {
                key: "storyteller".into(),
                display_name: "The Storyteller".into(),
                topics: vec![
                    "founder stories".into(),
                    "lessons from failure".into(),
                    "community wins".into(),
                ],
                weight: 1,
                thread_capable: false,
                markers: vec!["story".into(), "remember".into(), "when".into(), "we".into()],
                category: Some("narrative".into()),
            },
        ];

        Self::new(personas).unwrap_or_else(|e| unreachable!("builtin catalog is valid: {}", e))
    }
}
