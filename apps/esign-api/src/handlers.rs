//! HTTP handlers for the eSign API

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderName, StatusCode},
    Json,
};
use chrono::Utc;
use esign_core::{fit_width, stamp_detailed, transparentize, PlacementRequest};
use serde_json::{json, Value};

use crate::auth::{AccessParams, AccessPolicy, Authorized, ClientContext, RawAccessParams};
use crate::drive::DriveError;
use crate::error::{ApiError, ApiJson};
use crate::models::*;
use crate::naming::{output_names, safe_name, staged_template_name};
use crate::state::AppState;
use crate::webhook::{DOCUMENT_SIGNED, DOCUMENT_VIEWED};

const SIGNATURE_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/jpg", "image/webp"];

type FileResponse = ([(HeaderName, String); 2], Vec<u8>);

/// Health check endpoint
pub async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// JSON 404 for unknown API routes
pub async fn route_not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Route not found",
            "status": 404,
        })),
    )
}

/// Check access parameters sent in the body, without starting anything
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    ApiJson(raw): ApiJson<RawAccessParams>,
) -> Result<(StatusCode, Json<AuthorizeResponse>), ApiError> {
    let params = AccessParams::parse(raw).map_err(ApiError::InvalidRequest)?;
    Ok(authorization_outcome(&state.access, &params))
}

fn authorization_outcome(
    policy: &AccessPolicy,
    params: &AccessParams,
) -> (StatusCode, Json<AuthorizeResponse>) {
    match policy.check(params) {
        Ok(()) => (
            StatusCode::OK,
            Json(AuthorizeResponse {
                ok: true,
                reason: None,
            }),
        ),
        Err(denied) => {
            tracing::info!(email = %params.email, ?denied, "Authorization refused");
            (
                StatusCode::FORBIDDEN,
                Json(AuthorizeResponse {
                    ok: false,
                    reason: Some("Invalid params".to_string()),
                }),
            )
        }
    }
}

/// Create a signing session for the caller
pub async fn init_session(
    State(state): State<Arc<AppState>>,
    Authorized(params): Authorized,
) -> Result<Json<InitSessionResponse>, ApiError> {
    let user = SessionUser {
        email: params.email,
        display_name: params.name,
    };
    let session = state.store.create(user, params.doc_type).await?;

    Ok(Json(InitSessionResponse {
        session_id: session.session_id,
        record_id: session.id,
    }))
}

/// Load a session and make sure it belongs to the caller
async fn load_owned(
    state: &AppState,
    record_id: &str,
    params: &AccessParams,
) -> Result<SigningSession, ApiError> {
    let record_id = record_id.trim();
    if record_id.is_empty() {
        return Err(ApiError::InvalidRequest("recordId is required".to_string()));
    }
    let session = state.store.require(record_id).await?;
    if !session.user.email.eq_ignore_ascii_case(&params.email) {
        tracing::warn!(record_id, email = %params.email, "Session accessed by another user");
        return Err(ApiError::Forbidden(
            "Session belongs to another user".to_string(),
        ));
    }
    Ok(session)
}

/// Mark the session viewed, then fetch and stage its template
pub async fn open_session(
    State(state): State<Arc<AppState>>,
    Authorized(params): Authorized,
    client: ClientContext,
    ApiJson(req): ApiJson<RecordRequest>,
) -> Result<Json<OpenSessionResponse>, ApiError> {
    let mut session = load_owned(&state, &req.record_id, &params).await?;

    if session.status == SessionStatus::Initialized {
        session = state
            .store
            .advance(&session.id, SessionStatus::Opened)
            .await?;
    }

    state.notifier.emit(
        DOCUMENT_VIEWED,
        json!({
            "recordId": session.id,
            "sessionId": session.session_id,
            "email": params.email,
            "name": params.name,
            "docType": params.doc_type,
            "userAgent": client.user_agent,
            "clientIp": client.client_ip,
        }),
    );

    // Already staged: opening again only re-reports the view
    if session.status != SessionStatus::Opened {
        return Ok(Json(OpenSessionResponse {
            ok: true,
            template_name: session
                .template_name
                .unwrap_or_else(|| "template.pdf".to_string()),
        }));
    }

    let picked = state
        .drive
        .pick_template(session.doc_type, &state.settings.template_folders)
        .await?;
    let pdf = state.drive.download(&picked.id).await?;
    if pdf.is_empty() {
        return Err(ApiError::Drive(DriveError::NoTemplate(picked.id)));
    }

    let template_name = if picked.name.trim().is_empty() {
        "template.pdf".to_string()
    } else {
        picked.name.clone()
    };
    let filename = staged_template_name(Utc::now(), session.doc_type.as_str(), &template_name);
    state
        .store
        .stage_template(&session.id, &filename, &template_name, &pdf)
        .await?;

    tracing::info!(
        record_id = %session.id,
        template_id = %picked.id,
        template = %template_name,
        bytes = pdf.len(),
        "Template staged"
    );

    Ok(Json(OpenSessionResponse {
        ok: true,
        template_name,
    }))
}

/// Accept a signature image, clean it up and hold it in memory
pub async fn upload_signature(
    State(state): State<Arc<AppState>>,
    Authorized(params): Authorized,
    mut multipart: Multipart,
) -> Result<Json<OkResponse>, ApiError> {
    let mut record_id = None;
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "recordId" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
                record_id = Some(text);
            }
            "signature" => {
                let content_type = field.content_type().unwrap_or_default().to_lowercase();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
                upload = Some((content_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let record_id = record_id.ok_or_else(|| ApiError::InvalidRequest("recordId is required".into()))?;
    let (content_type, bytes) = upload
        .filter(|(_, bytes)| !bytes.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("No signature uploaded".into()))?;
    if !SIGNATURE_TYPES.contains(&content_type.as_str()) {
        return Err(ApiError::UnsupportedMedia("PNG/JPG/WEBP only".into()));
    }

    let session = load_owned(&state, &record_id, &params).await?;
    if !session
        .status
        .can_transition_to(SessionStatus::SignatureUploaded)
    {
        return Err(ApiError::BadState(format!(
            "Cannot upload a signature while the session is {}",
            session.status
        )));
    }

    let max_width = state.settings.signature_max_width;
    let received = bytes.len();
    let png = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ApiError> {
        let transparent = transparentize(&bytes);
        if transparent.is_empty() {
            return Err(ApiError::BadSignature(
                "Signature image could not be processed".into(),
            ));
        }
        fit_width(&transparent, max_width)
            .map_err(|e| ApiError::BadSignature(format!("Signature image processing failed: {}", e)))
    })
    .await??;

    let stored = png.len();
    state.cache.put(&session.id, png);
    state
        .store
        .advance(&session.id, SessionStatus::SignatureUploaded)
        .await?;

    tracing::info!(record_id = %session.id, received, stored, "Signature cached");
    Ok(Json(OkResponse { ok: true }))
}

/// Stamp the cached signature onto the staged template and file the result
pub async fn compose(
    State(state): State<Arc<AppState>>,
    Authorized(params): Authorized,
    client: ClientContext,
    ApiJson(req): ApiJson<ComposeRequest>,
) -> Result<Json<ComposeResponse>, ApiError> {
    let placement_request = PlacementRequest::new(req.page, req.x_pct, req.y_pct, req.width_pct);
    placement_request.validate()?;

    let session = load_owned(&state, &req.record_id, &params).await?;
    let template_ref = session
        .template_ref
        .clone()
        .ok_or_else(|| ApiError::BadState("Template not ready".into()))?;
    if session.status != SessionStatus::SignatureUploaded {
        return Err(ApiError::BadState("Upload a signature first".into()));
    }

    let signature = state.cache.get(&session.id).ok_or(ApiError::CacheMiss)?;
    let template = state
        .store
        .load_template(&template_ref)
        .await?
        .filter(|pdf| !pdf.is_empty())
        .ok_or_else(|| ApiError::BadState("Template PDF missing".into()))?;

    let root_folder = state.settings.drive_folder_id.clone();
    if root_folder.is_empty() {
        return Err(DriveError::Config("GOOGLE_DRIVE_FOLDER_ID is empty".into()).into());
    }

    let policy = state.settings.placement_policy;
    let png = signature.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        stamp_detailed(&template, &png, &placement_request, policy)
    })
    .await??;

    tracing::info!(
        record_id = %session.id,
        page = outcome.page,
        x = outcome.placement.x,
        y = outcome.placement.y,
        width = outcome.placement.width,
        height = outcome.placement.height,
        "Signature composited"
    );

    let folder_name = safe_name(&session.user.display_name);
    let user_folder = state
        .drive
        .ensure_child_folder(&root_folder, &folder_name)
        .await?;
    let (signed_name, signature_name) = output_names(
        &session.user.display_name,
        Utc::now(),
        state.settings.naming_timezone,
    );

    let signed = state
        .drive
        .upload(outcome.pdf, &signed_name, "application/pdf", &user_folder)
        .await?;
    state
        .drive
        .upload(signature.to_vec(), &signature_name, "image/png", &user_folder)
        .await?;

    let signed_session = state.store.mark_signed(&session.id, &signed.id).await?;

    if let Err(e) = state.store.delete_template(&template_ref).await {
        tracing::warn!(record_id = %session.id, error = %e, "Failed to delete staged template");
    }
    state.cache.delete(&session.id);

    state.notifier.emit(
        DOCUMENT_SIGNED,
        json!({
            "recordId": session.id,
            "sessionId": session.session_id,
            "signedDriveId": signed.id,
            "email": session.user.email,
            "name": session.user.display_name,
            "docType": session.doc_type,
            "page": outcome.page,
            "placement": outcome.placement,
            "userAgent": client.user_agent,
            "clientIp": client.client_ip,
            "signedAt": signed_session.signed_at,
        }),
    );

    Ok(Json(ComposeResponse {
        signed_drive_id: signed.id,
    }))
}

/// Staged template bytes for the in-browser preview
pub async fn preview_pdf(
    State(state): State<Arc<AppState>>,
    Authorized(params): Authorized,
    Path(record_id): Path<String>,
) -> Result<FileResponse, ApiError> {
    let session = load_owned(&state, &record_id, &params).await?;
    let template_ref = session
        .template_ref
        .ok_or_else(|| ApiError::RecordNotFound(record_id.clone()))?;
    let pdf = state
        .store
        .load_template(&template_ref)
        .await?
        .ok_or_else(|| ApiError::RecordNotFound(record_id.clone()))?;

    let name = session
        .template_name
        .as_deref()
        .map(safe_name)
        .unwrap_or_else(|| "template.pdf".to_string());
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", name),
            ),
        ],
        pdf,
    ))
}

/// Signed PDF fetched back from the drive
pub async fn download_signed(
    State(state): State<Arc<AppState>>,
    Authorized(params): Authorized,
    Path(record_id): Path<String>,
) -> Result<FileResponse, ApiError> {
    let session = load_owned(&state, &record_id, &params).await?;
    let signed_ref = session
        .signed_ref
        .ok_or_else(|| ApiError::RecordNotFound(record_id.clone()))?;

    let pdf = match state.drive.download(&signed_ref).await {
        Ok(pdf) => pdf,
        Err(DriveError::NotFound(_)) => return Err(ApiError::RecordNotFound(record_id)),
        Err(e) => return Err(e.into()),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"signed.pdf\"".to_string(),
            ),
        ],
        pdf,
    ))
}
