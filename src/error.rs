//! Error taxonomy of the incentive pipeline.
use crate::model::MetricField;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Per-field validation messages for a single seller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<MetricField, String>);

impl FieldErrors {
    pub fn insert(&mut self, field: MetricField, message: impl Into<String>) {
        self.0.insert(field, message.into());
    }

    pub fn get(&self, field: MetricField) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: MetricField) -> bool {
        self.0.contains_key(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricField, &str)> {
        self.0.iter().map(|(f, m)| (*f, m.as_str()))
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, message)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", field, message)?;
        }
        Ok(())
    }
}

impl std::error::Error for FieldErrors {}

/// The backend rejected or never acknowledged a write.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PersistError {
    pub message: String,
}

impl PersistError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The projection service failed to produce an incentive.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProjectError {
    pub message: String,
}

impl ProjectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Pipeline step at which a seller failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Validate,
    Persist,
    Project,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Validate => "validate",
            Step::Persist => "persist",
            Step::Project => "project",
        }
    }
}

/// Why a batch run or a single save did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("invalid metrics for seller {seller_id}: {errors}")]
    Validation {
        seller_id: String,
        errors: FieldErrors,
    },
    #[error("failed to save seller {seller_id}: {source}")]
    Persist {
        seller_id: String,
        #[source]
        source: PersistError,
    },
    #[error("failed to project incentive for seller {seller_id}: {source}")]
    Project {
        seller_id: String,
        #[source]
        source: ProjectError,
    },
    #[error("a batch run or save is already in progress")]
    Reentrant,
    #[error("seller {0} is not in the roster")]
    UnknownSeller(String),
}

impl BatchError {
    pub fn seller_id(&self) -> Option<&str> {
        match self {
            BatchError::Validation { seller_id, .. }
            | BatchError::Persist { seller_id, .. }
            | BatchError::Project { seller_id, .. } => Some(seller_id),
            BatchError::UnknownSeller(id) => Some(id),
            BatchError::Reentrant => None,
        }
    }

    pub fn step(&self) -> Option<Step> {
        match self {
            BatchError::Validation { .. } => Some(Step::Validate),
            BatchError::Persist { .. } => Some(Step::Persist),
            BatchError::Project { .. } => Some(Step::Project),
            BatchError::Reentrant | BatchError::UnknownSeller(_) => None,
        }
    }
}

/// Roster management and roster document errors.
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("seller name must be non-empty")]
    EmptyName,
    #[error("a seller named '{0}' already exists")]
    DuplicateName(String),
    #[error("duplicate seller id '{0}'")]
    DuplicateId(String),
    #[error("password must be at least {min} characters")]
    PasswordTooShort { min: usize },
    #[error("seller {0} is not in the roster")]
    UnknownSeller(String),
    #[error("store_id must be non-empty")]
    EmptyStoreId,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
