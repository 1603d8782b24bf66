use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Contact {
    pub id: i64,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub homephone: Option<String>,
    pub mobile: Option<String>,
    pub address: Option<String>,
    pub birthday: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Validated field set for an insert or a full update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactFields {
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub homephone: Option<String>,
    pub mobile: Option<String>,
    pub address: Option<String>,
    pub birthday: Option<String>,
}
