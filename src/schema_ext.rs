//! OpenAPI stand-ins for foreign types used in notification and push DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Timestamps on notifications and subscriptions
#[derive(Serialize, Deserialize, ToSchema)]
#[schema(value_type = String, format = "date-time", example = "2024-05-01T08:30:00Z")]
pub struct DateTimeWrapper(pub DateTime<Utc>);

/// Recipient, actor and subscriber ids
#[derive(Serialize, Deserialize, ToSchema)]
#[schema(value_type = String, format = "uuid", example = "7d3f5c1e-2b4a-4c8e-9f10-1a2b3c4d5e6f")]
pub struct UuidWrapper(pub Uuid);
