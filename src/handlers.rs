use crate::errors::{SettlementError, SettlementResult};
use crate::ledger::LedgerStore;
use crate::membership::TierEngine;
use crate::models::*;
use crate::notify::{Notifier, SettlementEvent};
use crate::orders::OrderStore;
use crate::shipping::RateStore;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub ledger: LedgerStore,
    pub orders: OrderStore,
    pub membership: TierEngine,
    pub rates: RateStore,
    pub notifier: Arc<Notifier>,
}

/// Authenticated caller identity, supplied by the identity layer in
/// front of this service. Authentication itself is out of scope; the
/// headers arrive already verified.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub staff: bool,
}

impl Caller {
    fn require_staff(&self) -> SettlementResult<()> {
        if self.staff {
            Ok(())
        } else {
            Err(SettlementError::NotFound("resource".to_string()))
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = SettlementError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SettlementError::Validation("missing x-user-id header".to_string()))?;

        let staff = parts
            .headers
            .get("x-staff")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "true")
            .unwrap_or(false);

        Ok(Caller { user_id, staff })
    }
}

// === Wallet ===

/// Current balance plus movement history for the caller.
pub async fn get_wallet(
    State(state): State<AppState>,
    caller: Caller,
) -> SettlementResult<Json<ApiResponse<WalletResponse>>> {
    state.ledger.ensure_account(&caller.user_id).await?;
    let balance = state.ledger.balance_of(&caller.user_id).await?;
    let entries = state.ledger.history(&caller.user_id).await?;

    Ok(Json(ApiResponse::success(WalletResponse {
        user_id: caller.user_id,
        balance,
        entries,
    })))
}

/// Staff top-up of a user's wallet. Replays with the same external_ref
/// are no-ops.
pub async fn top_up(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<TopUpRequest>,
) -> SettlementResult<Json<ApiResponse<WalletResponse>>> {
    caller.require_staff()?;

    tracing::info!(
        user_id = %payload.user_id,
        amount = payload.amount,
        external_ref = %payload.external_ref,
        "Top-up requested"
    );

    let (entry, balance) = state
        .ledger
        .top_up(
            &payload.user_id,
            payload.amount,
            &payload.external_ref,
            payload.note.as_deref(),
        )
        .await?;

    if entry.is_some() {
        state
            .notifier
            .publish_best_effort(SettlementEvent::TopupCompleted {
                user_id: payload.user_id.clone(),
                amount: payload.amount,
                new_balance: balance,
                timestamp: Utc::now(),
            })
            .await;
    }

    let entries = state.ledger.history(&payload.user_id).await?;

    Ok(Json(ApiResponse::success(WalletResponse {
        user_id: payload.user_id,
        balance,
        entries,
    })))
}

// === Orders ===

pub async fn create_order(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<CreateOrderRequest>,
) -> SettlementResult<Json<ApiResponse<OrderResponse>>> {
    tracing::info!(
        user_id = %caller.user_id,
        lines = payload.lines.len(),
        external_ref = %payload.external_ref,
        "Creating order"
    );

    let profile = state.membership.get_or_create_profile(&caller.user_id).await?;
    let response = state
        .orders
        .create_order(&caller.user_id, profile.tier, &payload)
        .await?;

    state
        .notifier
        .publish_best_effort(SettlementEvent::OrderCreated {
            user_id: caller.user_id,
            order_id: response.order.id.clone(),
            total: response.order.total,
            timestamp: Utc::now(),
        })
        .await;

    Ok(Json(ApiResponse::success(response)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    caller: Caller,
) -> SettlementResult<Json<ApiResponse<Vec<Order>>>> {
    let orders = state.orders.list_for_user(&caller.user_id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

pub async fn get_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<String>,
) -> SettlementResult<Json<ApiResponse<OrderResponse>>> {
    let order = state.orders.find_by_id(&order_id).await?;
    if order.user_id != caller.user_id && !caller.staff {
        // Not disclosed whether the order exists for someone else
        return Err(SettlementError::NotFound(format!("order {}", order_id)));
    }
    let lines = state.orders.lines_of(&order_id).await?;

    Ok(Json(ApiResponse::success(OrderResponse { order, lines })))
}

/// Staff advancement along the fulfillment path.
pub async fn advance_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<String>,
    Json(payload): Json<AdvanceStatusRequest>,
) -> SettlementResult<Json<ApiResponse<Order>>> {
    caller.require_staff()?;

    let order = state.orders.advance_status(&order_id, payload.status).await?;

    if order.status == OrderStatus::ArrivedTw {
        state
            .notifier
            .publish_best_effort(SettlementEvent::OrderArrived {
                user_id: order.user_id.clone(),
                order_id: order.id.clone(),
                shipping_outstanding: order.shipping_outstanding(),
                timestamp: Utc::now(),
            })
            .await;
    }

    Ok(Json(ApiResponse::success(order)))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<String>,
) -> SettlementResult<Json<ApiResponse<Order>>> {
    let order = state.orders.find_by_id(&order_id).await?;
    if order.user_id != caller.user_id && !caller.staff {
        return Err(SettlementError::NotFound(format!("order {}", order_id)));
    }

    let order = state.orders.cancel_order(&order_id).await?;

    Ok(Json(ApiResponse::success(order)))
}

/// Pay the order-level international shipping + box fee.
pub async fn pay_order_shipping(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<String>,
    Json(payload): Json<PayShippingRequest>,
) -> SettlementResult<Json<ApiResponse<Order>>> {
    let order = state
        .orders
        .pay_shipping(&order_id, &caller.user_id, &payload.external_ref)
        .await?;

    Ok(Json(ApiResponse::success(order)))
}

/// Pay shipping for a subset of the caller's lines.
pub async fn pay_line_shipping(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<PayLineShippingRequest>,
) -> SettlementResult<Json<ApiResponse<Vec<OrderLine>>>> {
    let lines = state
        .orders
        .pay_line_shipping(&caller.user_id, &payload.line_ids, &payload.external_ref)
        .await?;

    Ok(Json(ApiResponse::success(lines)))
}

/// Staff shortage refund.
pub async fn refund_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<String>,
    Json(payload): Json<RefundRequest>,
) -> SettlementResult<Json<ApiResponse<OrderResponse>>> {
    caller.require_staff()?;

    tracing::info!(
        order_id = %order_id,
        items = payload.items.len(),
        external_ref = %payload.external_ref,
        "Applying shortage refund"
    );

    let response = state
        .orders
        .refund_shortage(&order_id, &payload.items, &payload.external_ref)
        .await?;

    let refund_total: i64 = response.lines.iter().map(|l| l.refund_amount).sum();
    state
        .notifier
        .publish_best_effort(SettlementEvent::OrderRefunded {
            user_id: response.order.user_id.clone(),
            order_id: response.order.id.clone(),
            refund_total,
            timestamp: Utc::now(),
        })
        .await;

    Ok(Json(ApiResponse::success(response)))
}

/// Staff edit of a line's shipping inputs; fees are recomputed from the
/// current rate table.
pub async fn set_line_shipping(
    State(state): State<AppState>,
    caller: Caller,
    Path((order_id, line_id)): Path<(String, String)>,
    Json(payload): Json<LineShippingRequest>,
) -> SettlementResult<Json<ApiResponse<OrderLine>>> {
    caller.require_staff()?;

    let rates = state.rates.load().await?;
    let line = state
        .orders
        .set_line_shipping(
            &order_id,
            &line_id,
            payload.weight_kg,
            &payload.country,
            payload.method,
            &rates,
        )
        .await?;

    Ok(Json(ApiResponse::success(line)))
}

/// Staff edit of the order-level international fee and box fee.
pub async fn set_order_shipping(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<String>,
    Json(payload): Json<OrderShippingRequest>,
) -> SettlementResult<Json<ApiResponse<Order>>> {
    caller.require_staff()?;

    let order = state
        .orders
        .set_order_shipping(&order_id, payload.shipping_fee_intl, payload.box_fee)
        .await?;

    Ok(Json(ApiResponse::success(order)))
}

// === Membership ===

pub async fn upgrade_tier(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<UpgradeRequest>,
) -> SettlementResult<Json<ApiResponse<UpgradeResponse>>> {
    tracing::info!(
        user_id = %caller.user_id,
        target = %payload.target,
        "Tier upgrade requested"
    );

    let response = state.membership.upgrade(&caller.user_id, payload.target).await?;

    state
        .notifier
        .publish_best_effort(SettlementEvent::TierUpgraded {
            user_id: response.user_id.clone(),
            tier: response.tier.to_string(),
            fee_debited: response.fee_debited,
            timestamp: Utc::now(),
        })
        .await;

    Ok(Json(ApiResponse::success(response)))
}

/// Staff-triggered maintenance sweep (also runs on a timer).
pub async fn run_sweep(
    State(state): State<AppState>,
    caller: Caller,
) -> SettlementResult<Json<ApiResponse<SweepReport>>> {
    caller.require_staff()?;

    let report = state.membership.run_sweep().await?;

    for disabled in &report.disabled {
        state
            .notifier
            .publish_best_effort(SettlementEvent::LoginDisabled {
                user_id: disabled.user_id.clone(),
                reason: disabled.reason.clone(),
                timestamp: Utc::now(),
            })
            .await;
    }

    Ok(Json(ApiResponse::success(report)))
}

// === Shipping rates ===

/// Staff upsert of a shipping rate: either a country per-kg rate or a
/// method flat rate.
pub async fn upsert_rate(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<RateUpsertRequest>,
) -> SettlementResult<Json<ApiResponse<()>>> {
    caller.require_staff()?;

    match (payload.country, payload.per_kg, payload.method, payload.flat_fee) {
        (Some(country), Some(per_kg), None, None) => {
            state.rates.upsert_country_rate(&country, per_kg).await?;
        }
        (None, None, Some(method), Some(flat_fee)) => {
            state.rates.upsert_method_rate(method, flat_fee).await?;
        }
        _ => {
            return Err(SettlementError::Validation(
                "Provide either country + per_kg or method + flat_fee".to_string(),
            ));
        }
    }

    Ok(Json(ApiResponse::success(())))
}

/// Health check endpoint
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
