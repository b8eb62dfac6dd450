//! YAML data tables — site lists, personas, wordlists
//!
//! Loaded at startup, hot-reloadable. Reload uses snapshot-swap semantics:
//! a fresh table is parsed and the shared pointer replaced atomically, so
//! in-flight sessions keep the snapshot they started under.

use crate::error::{Error, Result};
use crate::types::Persona;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct WeightedSite {
    pub url: String,
    #[serde(default = "default_site_weight")]
    pub weight: f64,
}

fn default_site_weight() -> f64 {
    1.0
}

/// One immutable snapshot of every data file.
#[derive(Debug, Clone, Default)]
pub struct DataTables {
    /// category -> weighted URL list (sites.yaml)
    pub sites: HashMap<String, Vec<WeightedSite>>,
    /// persona pool (personas.yaml)
    pub personas: Vec<Persona>,
    /// category -> query wordlist (search_terms.yaml)
    pub search_terms: HashMap<String, Vec<String>>,
    /// academic_terms.yaml
    pub academic_terms: Vec<String>,
    /// shopping_terms.yaml
    pub shopping_terms: Vec<String>,
    /// onion_sites.yaml
    pub onion_sites: Vec<String>,
    /// user_agents.yaml
    pub user_agents: Vec<String>,
}

impl DataTables {
    pub fn has_category(&self, category: &str) -> bool {
        self.sites
            .get(category)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.sites.keys().map(|s| s.as_str())
    }
}

/// Shared handle over the current snapshot.
#[derive(Debug)]
pub struct DataStore {
    dir: PathBuf,
    inner: RwLock<Arc<DataTables>>,
}

impl DataStore {
    /// Load all tables from `dir`. Files the default-enabled engines depend
    /// on (sites, personas, search terms) are required; the rest degrade to
    /// empty with a warning.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let tables = Self::load_tables(&dir)?;
        Ok(Self {
            dir,
            inner: RwLock::new(Arc::new(tables)),
        })
    }

    /// Wrap an in-memory table set (tests, embedded defaults).
    pub fn from_tables(tables: DataTables) -> Self {
        Self {
            dir: PathBuf::new(),
            inner: RwLock::new(Arc::new(tables)),
        }
    }

    /// Current snapshot. Cheap; callers hold it for as long as they need
    /// consistency.
    pub fn snapshot(&self) -> Arc<DataTables> {
        self.inner.read().expect("data lock poisoned").clone()
    }

    /// Re-read every file and swap the snapshot in one step.
    pub fn reload(&self) -> Result<()> {
        let tables = Self::load_tables(&self.dir)?;
        *self.inner.write().expect("data lock poisoned") = Arc::new(tables);
        Ok(())
    }

    fn load_tables(dir: &Path) -> Result<DataTables> {
        let sites: HashMap<String, Vec<WeightedSite>> = required(dir, "sites.yaml")?;
        let mut personas: Vec<Persona> = required(dir, "personas.yaml")?;
        let search_terms: HashMap<String, Vec<String>> = required(dir, "search_terms.yaml")?;

        if personas.is_empty() {
            return Err(Error::data("personas.yaml contains no personas"));
        }
        if sites.values().all(|v| v.is_empty()) {
            return Err(Error::data("sites.yaml contains no usable categories"));
        }

        let user_agents: Vec<String> = optional(dir, "user_agents.yaml");
        for (i, persona) in personas.iter_mut().enumerate() {
            if persona.user_agent.is_empty() {
                match user_agents.get(i % user_agents.len().max(1)) {
                    Some(ua) => persona.user_agent = ua.clone(),
                    None => {
                        return Err(Error::data(format!(
                            "persona '{}' has no user_agent and user_agents.yaml is empty",
                            persona.name
                        )))
                    }
                }
            }
        }

        Ok(DataTables {
            sites,
            personas,
            search_terms,
            academic_terms: optional(dir, "academic_terms.yaml"),
            shopping_terms: optional(dir, "shopping_terms.yaml"),
            onion_sites: optional(dir, "onion_sites.yaml"),
            user_agents,
        })
    }
}

fn required<T: for<'de> Deserialize<'de>>(dir: &Path, name: &str) -> Result<T> {
    let path = dir.join(name);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::data(format!("{}: {e}", path.display())))?;
    serde_yaml::from_str(&content).map_err(|e| Error::data(format!("{name}: {e}")))
}

fn optional<T: for<'de> Deserialize<'de> + Default>(dir: &Path, name: &str) -> T {
    let path = dir.join(name);
    match std::fs::read_to_string(&path) {
        Ok(content) => match serde_yaml::from_str(&content) {
            Ok(t) => t,
            Err(e) => {
                warn!("{name} malformed, engine using it will be disabled: {e}");
                T::default()
            }
        },
        Err(_) => {
            warn!("{name} missing, engine using it will be disabled");
            T::default()
        }
    }
}
