use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::get,
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{error::ApiError, state::AppState};

use super::{
    dto::{ContactRequest, DeletedResponse},
    repo_types::Contact,
    services::{parse_id, validate},
};

pub fn contact_routes() -> Router<AppState> {
    Router::new()
        .route("/contacts", get(list_contacts).post(create_contact))
        .route(
            "/contacts/:id",
            get(get_contact).put(update_contact).delete(delete_contact),
        )
}

fn read_body(body: Result<Json<ContactRequest>, JsonRejection>) -> Result<ContactRequest, ApiError> {
    body.map(|Json(b)| b).map_err(|e| {
        warn!(error = %e, "rejected contact body");
        ApiError::BadBody(e.body_text())
    })
}

#[instrument(skip(state))]
pub async fn list_contacts(State(state): State<AppState>) -> Result<Json<Vec<Contact>>, ApiError> {
    let contacts = Contact::list(&state.store).await?;
    Ok(Json(contacts))
}

#[instrument(skip(state))]
pub async fn get_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Contact>, ApiError> {
    let id = parse_id(&id)?;
    Contact::find(&state.store, id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[instrument(skip(state, body))]
pub async fn create_contact(
    State(state): State<AppState>,
    body: Result<Json<ContactRequest>, JsonRejection>,
) -> Result<(StatusCode, HeaderMap, Json<Contact>), ApiError> {
    let fields = validate(read_body(body)?)?;
    let contact = Contact::create(&state.store, &fields).await?;

    let mut headers = HeaderMap::new();
    let location = HeaderValue::from_str(&format!("/contacts/{}", contact.id))
        .map_err(|e| ApiError::Internal(e.into()))?;
    headers.insert(header::LOCATION, location);

    info!(id = contact.id, "contact created");
    Ok((StatusCode::CREATED, headers, Json(contact)))
}

#[instrument(skip(state, body))]
pub async fn update_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ContactRequest>, JsonRejection>,
) -> Result<Json<Contact>, ApiError> {
    let fields = validate(read_body(body)?)?;
    let id = parse_id(&id)?;

    let contact = Contact::update(&state.store, id, &fields)
        .await?
        .ok_or(ApiError::NotFound)?;
    info!(id, "contact updated");
    Ok(Json(contact))
}

#[instrument(skip(state))]
pub async fn delete_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let id = parse_id(&id)?;
    if !Contact::delete(&state.store, id).await? {
        return Err(ApiError::NotFound);
    }
    info!(id, "contact deleted");
    Ok(Json(DeletedResponse {
        success: true,
        message: "Contact deleted successfully",
    }))
}
