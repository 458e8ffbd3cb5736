//! Seller roster: ordered collection with id and name uniqueness, plus the
//! YAML roster document the CLI works against.
use crate::error::RosterError;
use crate::model::{Goals, MetricField, MetricInput, MetricsInput, Seller};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 4;

/// Ordered sellers of one store. Iteration order is insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Roster {
    sellers: Vec<Seller>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a roster from existing records, enforcing the uniqueness invariants.
    pub fn from_sellers(sellers: Vec<Seller>) -> Result<Self, RosterError> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for seller in &sellers {
            if seller.name.trim().is_empty() {
                return Err(RosterError::EmptyName);
            }
            if !ids.insert(seller.id.as_str()) {
                return Err(RosterError::DuplicateId(seller.id.clone()));
            }
            if !names.insert(seller.name.trim().to_lowercase()) {
                return Err(RosterError::DuplicateName(seller.name.clone()));
            }
        }
        Ok(Self { sellers })
    }

    pub fn len(&self) -> usize {
        self.sellers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sellers.is_empty()
    }

    pub fn get(&self, seller_id: &str) -> Option<&Seller> {
        self.sellers.iter().find(|s| s.id == seller_id)
    }

    /// Add a seller with zeroed metrics and return its generated id.
    ///
    /// An empty `password` defaults to the lowercase name.
    pub fn add_seller(&mut self, name: &str, password: &str) -> Result<String, RosterError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RosterError::EmptyName);
        }
        let lowered = name.to_lowercase();
        if self
            .sellers
            .iter()
            .any(|s| s.name.trim().to_lowercase() == lowered)
        {
            return Err(RosterError::DuplicateName(name.to_string()));
        }

        let password = match password.trim() {
            "" => lowered,
            p => p.to_string(),
        };
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(RosterError::PasswordTooShort {
                min: MIN_PASSWORD_LEN,
            });
        }

        let id = Uuid::new_v4().to_string();
        self.sellers.push(Seller {
            id: id.clone(),
            name: name.to_string(),
            avatar_id: String::new(),
            metrics: MetricsInput::zeroed(),
            password,
        });
        info!(seller_id = %id, "seller added");
        Ok(id)
    }

    pub fn remove_seller(&mut self, seller_id: &str) -> Result<Seller, RosterError> {
        let idx = self
            .sellers
            .iter()
            .position(|s| s.id == seller_id)
            .ok_or_else(|| RosterError::UnknownSeller(seller_id.to_string()))?;
        info!(seller_id, "seller removed");
        Ok(self.sellers.remove(idx))
    }

    /// Overwrite one raw metric field; `None` clears it.
    pub fn set_metric(
        &mut self,
        seller_id: &str,
        field: MetricField,
        value: Option<MetricInput>,
    ) -> Result<(), RosterError> {
        let seller = self
            .sellers
            .iter_mut()
            .find(|s| s.id == seller_id)
            .ok_or_else(|| RosterError::UnknownSeller(seller_id.to_string()))?;
        seller.metrics.set(field, value);
        Ok(())
    }
}

impl<'de> Deserialize<'de> for Roster {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let sellers = Vec::<Seller>::deserialize(deserializer)?;
        Roster::from_sellers(sellers).map_err(serde::de::Error::custom)
    }
}

impl<'a> IntoIterator for &'a Roster {
    type Item = &'a Seller;
    type IntoIter = std::slice::Iter<'a, Seller>;

    fn into_iter(self) -> Self::IntoIter {
        self.sellers.iter()
    }
}

/// On-disk roster: store id, shared goals and sellers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RosterDocument {
    pub store_id: String,
    #[serde(default)]
    pub goals: Goals,
    #[serde(default)]
    pub sellers: Roster,
}

impl RosterDocument {
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let content = fs::read_to_string(path)?;
        let doc: RosterDocument = serde_yaml::from_str(&content)?;
        if doc.store_id.trim().is_empty() {
            return Err(RosterError::EmptyStoreId);
        }
        Ok(doc)
    }

    pub fn save(&self, path: &Path) -> Result<(), RosterError> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
