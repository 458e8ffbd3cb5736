pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod projection;
pub mod roster;
pub mod store;
pub mod validate;

pub use error::{BatchError, FieldErrors, PersistError, ProjectError, RosterError, Step};
pub use model::{
    BatchRunState, Goals, Incentive, IncentiveAggregate, MetricField, MetricInput, Metrics,
    MetricsInput, SaveState, Seller,
};
pub use pipeline::{Pipeline, PipelineEvent};
pub use roster::{Roster, RosterDocument};
