use serde::{Deserialize, Serialize};

/// POST/PUT body. Every field is optional here; presence is checked by validation.
#[derive(Debug, Default, Deserialize)]
pub struct ContactRequest {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub email: Option<String>,
    pub homephone: Option<String>,
    pub mobile: Option<String>,
    pub address: Option<String>,
    pub birthday: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub success: bool,
    pub message: &'static str,
}
