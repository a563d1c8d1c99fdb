//! Persona and topic rotation

use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::domain::{Account, Persona, PersonaCatalog};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    Weighted,
    RoundRobin,
}

impl std::str::FromStr for RotationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "weighted" => Ok(RotationPolicy::Weighted),
            "round_robin" | "round-robin" => Ok(RotationPolicy::RoundRobin),
            other => Err(format!("unknown rotation policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentShape {
    Single,
    Thread,
}

#[derive(Debug, Clone)]
pub struct Pick {
    pub persona: Persona,
    pub topic: String,
    pub shape: ContentShape,
}

pub struct PersonaRotator {
    catalog: Arc<PersonaCatalog>,
    policy: RotationPolicy,
    thread_probability: f64,
    last_topics: Mutex<HashMap<i64, String>>,
}

impl PersonaRotator {
    pub fn new(catalog: Arc<PersonaCatalog>, policy: RotationPolicy, thread_probability: f64) -> Self {
        Self {
            catalog,
            policy,
            thread_probability: thread_probability.clamp(0.0, 1.0),
            last_topics: Mutex::new(HashMap::new()),
        }
    }

    /// Catalog personas the account may use, in the account's order.
    pub fn allowed(&self, account: &Account) -> Result<Vec<&Persona>, ConfigError> {
        let allowed: Vec<&Persona> = if account.personas.is_empty() {
            self.catalog
                .keys()
                .iter()
                .filter_map(|k| self.catalog.get(k))
                .collect()
        } else {
            account
                .personas
                .iter()
                .filter_map(|key| {
                    let persona = self.catalog.get(key);
                    if persona.is_none() {
                        warn!(account_id = account.id, persona = %key, "Unknown persona on account, ignoring");
                    }
                    persona
                })
                .collect()
        };

        if allowed.is_empty() {
            return Err(ConfigError::NoEligiblePersonas {
                account_id: account.id,
            });
        }
        Ok(allowed)
    }

    pub fn pick_next<R: Rng + ?Sized>(
        &self,
        account: &Account,
        iteration: usize,
        requested: Option<&str>,
        rng: &mut R,
    ) -> Result<Pick, ConfigError> {
        let allowed = self.allowed(account)?;

        let persona = match requested {
            Some(key) => match allowed.iter().find(|p| p.key == key) {
                Some(p) => *p,
                None => {
                    let substitute = allowed[rng.random_range(0..allowed.len())];
                    warn!(
                        account_id = account.id,
                        requested = %key,
                        substitute = %substitute.key,
                        "Requested persona not allowed for account, substituting"
                    );
                    substitute
                }
            },
            None => match self.policy {
                RotationPolicy::RoundRobin => allowed[iteration % allowed.len()],
                RotationPolicy::Weighted => weighted_choice(&allowed, rng),
            },
        };

        let topic = self.pick_topic(account.id, persona, rng)?;

        let threads_allowed = persona.thread_capable && account.branding().threads_enabled;
        let shape = if threads_allowed && rng.random_bool(self.thread_probability) {
            ContentShape::Thread
        } else {
            ContentShape::Single
        };

        Ok(Pick {
            persona: persona.clone(),
            topic,
            shape,
        })
    }

    fn pick_topic<R: Rng + ?Sized>(
        &self,
        account_id: i64,
        persona: &Persona,
        rng: &mut R,
    ) -> Result<String, ConfigError> {
        let topics: Vec<&String> = persona.topics.iter().filter(|t| !t.trim().is_empty()).collect();
        if topics.is_empty() {
            return Err(ConfigError::PersonaWithoutTopics(persona.key.clone()));
        }

        let mut last_topics = self.last_topics.lock().unwrap_or_else(|e| e.into_inner());
        let previous = last_topics.get(&account_id);
        let candidates: Vec<&String> = match previous {
            Some(prev) if topics.len() > 1 => topics.iter().copied().filter(|t| *t != prev).collect(),
            _ => topics.clone(),
        };
        let candidates = if candidates.is_empty() { topics } else { candidates };

        let topic = candidates[rng.random_range(0..candidates.len())].clone();
        last_topics.insert(account_id, topic.clone());
        Ok(topic)
    }
}

fn weighted_choice<'a, R: Rng + ?Sized>(personas: &[&'a Persona], rng: &mut R) -> &'a Persona {
    let total: u64 = personas.iter().map(|p| p.weight as u64).sum();
    if total == 0 {
        return personas[rng.random_range(0..personas.len())];
    }
    let mut roll = rng.random_range(0..total);
    for persona in personas {
        let w = persona.weight as u64;
        if roll < w {
            return *persona;
        }
        roll -= w;
    }
    personas[personas.len() - 1]
}
