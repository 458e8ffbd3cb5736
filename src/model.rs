use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// The four performance metrics tracked per seller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricField {
    #[serde(rename = "vendas")]
    Vendas,
    #[serde(rename = "pa")]
    Pa,
    #[serde(rename = "ticketMedio")]
    TicketMedio,
    #[serde(rename = "corridinhaDiaria")]
    CorridinhaDiaria,
}

impl MetricField {
    pub const ALL: [MetricField; 4] = [
        MetricField::Vendas,
        MetricField::Pa,
        MetricField::TicketMedio,
        MetricField::CorridinhaDiaria,
    ];

    /// Wire name, as used in the backend JSON body and roster files.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricField::Vendas => "vendas",
            MetricField::Pa => "pa",
            MetricField::TicketMedio => "ticketMedio",
            MetricField::CorridinhaDiaria => "corridinhaDiaria",
        }
    }

    pub fn parse_field(s: &str) -> Option<Self> {
        MetricField::ALL.into_iter().find(|f| f.as_str() == s)
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw value of a metric as typed into a form: either a number or free text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetricInput {
    Number(f64),
    Text(String),
}

/// Unvalidated metric fields of a seller. `None` means the field is absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendas: Option<MetricInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pa: Option<MetricInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_medio: Option<MetricInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corridinha_diaria: Option<MetricInput>,
}

impl MetricsInput {
    /// All four fields set to the number zero, the state of a freshly added seller.
    pub fn zeroed() -> Self {
        Self::from(Metrics::default())
    }

    pub fn get(&self, field: MetricField) -> Option<&MetricInput> {
        match field {
            MetricField::Vendas => self.vendas.as_ref(),
            MetricField::Pa => self.pa.as_ref(),
            MetricField::TicketMedio => self.ticket_medio.as_ref(),
            MetricField::CorridinhaDiaria => self.corridinha_diaria.as_ref(),
        }
    }

    pub fn set(&mut self, field: MetricField, value: Option<MetricInput>) {
        let slot = match field {
            MetricField::Vendas => &mut self.vendas,
            MetricField::Pa => &mut self.pa,
            MetricField::TicketMedio => &mut self.ticket_medio,
            MetricField::CorridinhaDiaria => &mut self.corridinha_diaria,
        };
        *slot = value;
    }
}

impl From<Metrics> for MetricsInput {
    fn from(m: Metrics) -> Self {
        Self {
            vendas: Some(MetricInput::Number(m.vendas)),
            pa: Some(MetricInput::Number(m.pa)),
            ticket_medio: Some(MetricInput::Number(m.ticket_medio)),
            corridinha_diaria: Some(MetricInput::Number(m.corridinha_diaria)),
        }
    }
}

/// Validated metrics: every value is finite and non-negative.
///
/// Only values of this type reach the persistence backend. Construct them via
/// [`crate::validate::validate`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub vendas: f64,
    pub pa: f64,
    pub ticket_medio: f64,
    pub corridinha_diaria: f64,
}

/// A sales agent in a roster.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Seller {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar_id: String,
    #[serde(flatten)]
    pub metrics: MetricsInput,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for Seller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seller")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("avatar_id", &self.avatar_id)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Roster-wide target configuration, passed through to the projector untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Goals(pub Value);

/// Computed incentive for one seller, as returned by the projector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Incentive(pub Value);

/// Seller id -> incentive for a fully successful batch run.
pub type IncentiveAggregate = BTreeMap<String, Incentive>;

/// Transient persistence state of one seller during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SaveState {
    Idle,
    Saving,
    Saved,
    Failed(String),
}

/// State of the batch run owned by a pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum BatchRunState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed(String),
}

impl BatchRunState {
    pub fn is_running(&self) -> bool {
        matches!(self, BatchRunState::Running)
    }
}
