use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::model::{InviteTokenStatus, Tenancy, TenancyStatus};
use crate::schemas::{validate_input, AcceptInviteInput, TenancyPath};
use crate::services::tenancy_lifecycle;
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/tenancies/accept-invite",
            axum::routing::post(accept_invite),
        )
        .route(
            "/tenancies/{tenancy_id}",
            axum::routing::get(get_tenancy),
        )
        .route(
            "/tenancies/{tenancy_id}/close",
            axum::routing::post(close_tenancy),
        )
        .route(
            "/tenancies/{tenancy_id}/invoices",
            axum::routing::get(list_tenancy_invoices),
        )
}

/// Accept a landlord's invite and create the tenancy.
///
/// Token consumption is single-use: the `pending -> used` swap happens in the
/// store, so a token accepted twice (or concurrently) creates exactly one
/// tenancy. Billing starts on the lease's start date.
async fn accept_invite(
    State(state): State<AppState>,
    Json(payload): Json<AcceptInviteInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let now = Utc::now();

    let invite = state
        .store
        .get_invite_token(&payload.token)
        .await?
        .ok_or_else(|| AppError::NotFound("Invite token not found.".to_string()))?;

    if invite.status != InviteTokenStatus::Pending {
        return Err(AppError::Gone(
            "This invite has already been used.".to_string(),
        ));
    }
    if invite.expires_at < now {
        return Err(AppError::BadRequest("This invite has expired.".to_string()));
    }

    let Some(invite) = state
        .store
        .consume_invite_token(&payload.token, &payload.tenant_id, now)
        .await?
    else {
        return Err(AppError::Gone(
            "This invite has already been used.".to_string(),
        ));
    };

    let tenancy = state
        .store
        .create_tenancy(Tenancy {
            id: Uuid::new_v4().to_string(),
            tenant_id: payload.tenant_id,
            landlord_id: invite.landlord_id,
            property_id: invite.property_id,
            unit_id: invite.unit_id,
            rent_amount: invite.rent_amount,
            currency: invite.currency,
            billing_cycle: invite.billing_cycle,
            status: TenancyStatus::Active,
            invoice_scheduling_enabled: true,
            next_invoice_date: invite.start_date,
            start_date: invite.start_date,
            end_date: None,
            created_at: now,
        })
        .await?;

    tracing::info!(
        tenancy_id = %tenancy.id,
        landlord_id = %tenancy.landlord_id,
        "Invite accepted; tenancy created"
    );
    Ok((axum::http::StatusCode::CREATED, Json(json!(tenancy))))
}

async fn get_tenancy(
    State(state): State<AppState>,
    Path(path): Path<TenancyPath>,
) -> AppResult<Json<Value>> {
    let tenancy = state
        .store
        .get_tenancy(&path.tenancy_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Tenancy not found.".to_string()))?;
    Ok(Json(json!(tenancy)))
}

/// Tenant move-out: close the tenancy and cancel its outstanding invoices.
async fn close_tenancy(
    State(state): State<AppState>,
    Path(path): Path<TenancyPath>,
) -> AppResult<Json<Value>> {
    let outcome =
        tenancy_lifecycle::close_tenancy(state.store.as_ref(), &path.tenancy_id, Utc::now())
            .await?;
    Ok(Json(json!(outcome)))
}

async fn list_tenancy_invoices(
    State(state): State<AppState>,
    Path(path): Path<TenancyPath>,
) -> AppResult<Json<Value>> {
    if state.store.get_tenancy(&path.tenancy_id).await?.is_none() {
        return Err(AppError::NotFound("Tenancy not found.".to_string()));
    }
    let invoices = state
        .store
        .list_invoices_for_tenancy(&path.tenancy_id)
        .await?;
    Ok(Json(json!({ "data": invoices })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{Duration, TimeZone};
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::model::{BillingCycle, InviteToken};

    async fn state_with_invite(expired: bool) -> AppState {
        let state = AppState::for_tests(AppConfig::from_env());
        let expires_at = if expired {
            Utc::now() - Duration::days(1)
        } else {
            Utc::now() + Duration::days(14)
        };
        state
            .store
            .create_invite_token(InviteToken {
                token: "tok-1".to_string(),
                landlord_id: "landlord-1".to_string(),
                property_id: "prop-1".to_string(),
                unit_id: "unit-1".to_string(),
                rent_amount: 100_000.0,
                currency: "NGN".to_string(),
                billing_cycle: BillingCycle::Monthly,
                start_date: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
                status: InviteTokenStatus::Pending,
                expires_at,
                used_at: None,
                used_by: None,
            })
            .await
            .unwrap();
        state
    }

    fn accept_request(token: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/tenancies/accept-invite")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "token": token, "tenant_id": "tenant-1" }).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn accepting_an_invite_creates_a_scheduled_tenancy() {
        let state = state_with_invite(false).await;
        let app = crate::routes::v1_router().with_state(state.clone());

        let response = app.oneshot(accept_request("tok-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let tenancy: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            tenancy.get("invoice_scheduling_enabled"),
            Some(&Value::Bool(true))
        );
        assert_eq!(
            tenancy.get("status").and_then(Value::as_str),
            Some("active")
        );
        assert_eq!(
            tenancy.get("next_invoice_date").and_then(Value::as_str),
            tenancy.get("start_date").and_then(Value::as_str),
        );
    }

    #[tokio::test]
    async fn second_accept_of_the_same_invite_is_gone() {
        let state = state_with_invite(false).await;
        let app = crate::routes::v1_router().with_state(state.clone());

        let first = app.clone().oneshot(accept_request("tok-1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let second = app.oneshot(accept_request("tok-1")).await.unwrap();
        assert_eq!(second.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn expired_and_unknown_invites_are_rejected() {
        let state = state_with_invite(true).await;
        let app = crate::routes::v1_router().with_state(state.clone());

        let expired = app.clone().oneshot(accept_request("tok-1")).await.unwrap();
        assert_eq!(expired.status(), StatusCode::BAD_REQUEST);
        let unknown = app.oneshot(accept_request("tok-missing")).await.unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }
}
