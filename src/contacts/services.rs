use crate::error::ApiError;

use super::{dto::ContactRequest, repo_types::ContactFields};

pub const REQUIRED_FIELDS_MESSAGE: &str = "First name, last name and email are required";

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn optional(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Checks required fields and normalises empty optional fields to `None`.
pub fn validate(req: ContactRequest) -> Result<ContactFields, ApiError> {
    let (Some(firstname), Some(lastname), Some(email)) =
        (required(req.firstname), required(req.lastname), required(req.email))
    else {
        return Err(ApiError::Validation(REQUIRED_FIELDS_MESSAGE.into()));
    };

    Ok(ContactFields {
        firstname,
        lastname,
        email,
        homephone: optional(req.homephone),
        mobile: optional(req.mobile),
        address: optional(req.address),
        birthday: optional(req.birthday),
    })
}

/// Path ids that are not integers cannot name a row.
pub fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>().map_err(|_| ApiError::NotFound)
}
