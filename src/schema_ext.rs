use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lets `DateTime<Utc>` fields show up as RFC 3339 strings in the API docs
#[derive(Serialize, Deserialize, ToSchema)]
#[schema(value_type = String, format = "date-time", example = "2023-01-01T12:00:00Z")]
pub struct DateTimeWrapper(pub DateTime<Utc>);
