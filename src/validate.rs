//! Metric validation run before any seller is persisted.
//!
//! Validation is the only way to obtain [`Metrics`]. Malformed input is
//! rejected per field and never coerced to zero.
use crate::error::FieldErrors;
use crate::model::{MetricField, MetricInput, Metrics, MetricsInput, Seller};

/// Validate the four metric fields of `seller`, returning the typed metrics
/// that may be persisted, or every failing field with its message.
pub fn validate(seller: &Seller) -> Result<Metrics, FieldErrors> {
    validate_metrics(&seller.metrics)
}

pub fn validate_metrics(input: &MetricsInput) -> Result<Metrics, FieldErrors> {
    let mut errors = FieldErrors::default();
    let mut metrics = Metrics::default();

    for field in MetricField::ALL {
        match check_field(input.get(field)) {
            Ok(value) => match field {
                MetricField::Vendas => metrics.vendas = value,
                MetricField::Pa => metrics.pa = value,
                MetricField::TicketMedio => metrics.ticket_medio = value,
                MetricField::CorridinhaDiaria => metrics.corridinha_diaria = value,
            },
            Err(message) => errors.insert(field, message),
        }
    }

    if errors.is_empty() {
        Ok(metrics)
    } else {
        Err(errors)
    }
}

fn check_field(input: Option<&MetricInput>) -> Result<f64, &'static str> {
    let value = match input {
        None => return Err("is required"),
        Some(MetricInput::Number(n)) => *n,
        Some(MetricInput::Text(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err("is required");
            }
            trimmed.parse::<f64>().map_err(|_| "must be a number")?
        }
    };
    if !value.is_finite() {
        return Err("must be a finite number");
    }
    if value < 0.0 {
        return Err("must not be negative");
    }
    // Normalizes -0.0.
    Ok(value + 0.0)
}
