use crate::catalog::CatalogClient;
use crate::errors::{SettlementError, SettlementResult};
use crate::holds::HoldStore;
use crate::ledger::LedgerStore;
use crate::membership::TierEngine;
use crate::models::{
    ChargeType, CreateOrderRequest, EntryType, LineStatus, Order, OrderLine, OrderResponse,
    OrderStatus, ProductStatus, RefundItem, Tier,
};
use crate::shipping::{self, RateTable};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashSet;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, user_id, status, total, hold_id, external_ref, \
     shipping_fee_intl, box_fee, shipping_paid, recipient_name, recipient_phone, \
     recipient_address, country, shipping_method, created_at, updated_at";

const LINE_COLUMNS: &str = "id, order_id, product_id, qty, unit_price, status, \
     refund_amount, weight_kg, shipping_fee_intl, shipping_fee_domestic, \
     shipping_paid, created_at, updated_at";

/// Order settlement engine.
///
/// Every workflow here is one database transaction: the hold, the ledger
/// write, the balance movement and the order/line rows commit together
/// or not at all. Ledger and hold writes go through their stores; this
/// module never touches `balances` or `ledger_entries` directly.
#[derive(Clone)]
pub struct OrderStore {
    pool: PgPool,
    ledger: LedgerStore,
    holds: HoldStore,
    catalog: CatalogClient,
}

impl OrderStore {
    pub fn new(pool: PgPool, ledger: LedgerStore, holds: HoldStore, catalog: CatalogClient) -> Self {
        Self {
            pool,
            ledger,
            holds,
            catalog,
        }
    }

    /// Create an order: validate and price every line, freeze the total
    /// against the buyer's balance, then write the order and its lines.
    ///
    /// Pricing is tier-gated: wholesale price only when the buyer's tier
    /// grants it, retail otherwise. Any line failure rejects the whole
    /// request before a single row is written. A replayed
    /// `external_ref` returns the previously created order.
    pub async fn create_order(
        &self,
        user_id: &str,
        tier: Tier,
        req: &CreateOrderRequest,
    ) -> SettlementResult<OrderResponse> {
        if req.lines.is_empty() {
            return Err(SettlementError::Validation(
                "Order must contain at least one line".to_string(),
            ));
        }
        if req.external_ref.trim().is_empty() {
            return Err(SettlementError::Validation(
                "external_ref is required".to_string(),
            ));
        }

        // Validate and price every requested line up front.
        let mut priced: Vec<(String, i32, i64)> = Vec::with_capacity(req.lines.len());
        for line in &req.lines {
            if line.qty <= 0 {
                return Err(SettlementError::Validation(format!(
                    "Quantity for product {} must be positive",
                    line.product_id
                )));
            }

            let product = self.catalog.product(&line.product_id).await?;

            if product.status != ProductStatus::Published {
                return Err(SettlementError::Validation(format!(
                    "Product {} is not published",
                    product.id
                )));
            }
            if line.qty < product.moq {
                return Err(SettlementError::Validation(format!(
                    "Product {} requires a minimum order quantity of {}",
                    product.id, product.moq
                )));
            }

            let unit_price = if tier.wholesale_pricing() {
                product.wholesale_price.unwrap_or(product.retail_price)
            } else {
                product.retail_price
            };

            priced.push((line.product_id.clone(), line.qty, unit_price));
        }

        let total: i64 = priced.iter().map(|(_, qty, price)| *qty as i64 * price).sum();

        let mut tx = self.pool.begin().await?;

        // Idempotent replay: the HOLD entry carries the external_ref, so
        // its presence means this order already committed.
        if self.ledger.already_applied_in_tx(&mut tx, &req.external_ref).await? {
            tx.rollback().await?;
            tracing::info!(
                user_id = %user_id,
                external_ref = %req.external_ref,
                "Order already created, returning existing (idempotent)"
            );
            let order = self.find_by_external_ref(&req.external_ref).await?;
            let lines = self.lines_of(&order.id).await?;
            return Ok(OrderResponse { order, lines });
        }

        // Freeze the funds: FROZEN hold, HOLD ledger entry, guarded
        // balance debit. The debit's compare-and-swap is what makes two
        // racing orders on one account safe.
        let hold = self.holds.create_in_tx(&mut tx, user_id, total).await?;
        self.ledger
            .debit_in_tx(
                &mut tx,
                user_id,
                EntryType::Hold,
                total,
                Some(ChargeType::Product),
                Some(&req.external_ref),
                Some("order funds frozen"),
            )
            .await?;

        let order_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            INSERT INTO orders
                (id, user_id, status, total, hold_id, external_ref,
                 shipping_fee_intl, box_fee, shipping_paid,
                 recipient_name, recipient_phone, recipient_address,
                 country, shipping_method, created_at, updated_at)
            VALUES ($1, $2, 'PENDING', $3, $4, $5, 0, 0, FALSE, $6, $7, $8, $9, $10, $11, $11)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(&order_id)
        .bind(user_id)
        .bind(total)
        .bind(&hold.id)
        .bind(&req.external_ref)
        .bind(&req.recipient_name)
        .bind(&req.recipient_phone)
        .bind(&req.recipient_address)
        .bind(&req.country)
        .bind(req.shipping_method)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let mut lines = Vec::with_capacity(priced.len());
        for (product_id, qty, unit_price) in &priced {
            let line = sqlx::query_as::<_, OrderLine>(&format!(
                r#"
                INSERT INTO order_lines
                    (id, order_id, product_id, qty, unit_price, status, refund_amount,
                     weight_kg, shipping_fee_intl, shipping_fee_domestic, shipping_paid,
                     created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, 'NORMAL', 0, NULL, 0, 0, FALSE, $6, $6)
                RETURNING {LINE_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4().to_string())
            .bind(&order_id)
            .bind(product_id)
            .bind(qty)
            .bind(unit_price)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            lines.push(line);
        }

        self.holds.link_order_in_tx(&mut tx, &hold.id, &order_id).await?;

        TierEngine::record_purchase_in_tx(&mut tx, user_id, now.date_naive()).await?;

        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            user_id = %user_id,
            total = total,
            "Order created"
        );

        Ok(OrderResponse { order, lines })
    }

    pub async fn find_by_id(&self, order_id: &str) -> SettlementResult<Order> {
        sqlx::query_as::<_, Order>(&format!(
            r#"SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"#
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SettlementError::NotFound(format!("order {}", order_id)))
    }

    pub async fn find_by_external_ref(&self, external_ref: &str) -> SettlementResult<Order> {
        sqlx::query_as::<_, Order>(&format!(
            r#"SELECT {ORDER_COLUMNS} FROM orders WHERE external_ref = $1"#
        ))
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SettlementError::NotFound(format!("order ref {}", external_ref)))
    }

    pub async fn list_for_user(&self, user_id: &str) -> SettlementResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    pub async fn lines_of(&self, order_id: &str) -> SettlementResult<Vec<OrderLine>> {
        let lines = sqlx::query_as::<_, OrderLine>(&format!(
            r#"
            SELECT {LINE_COLUMNS} FROM order_lines
            WHERE order_id = $1
            ORDER BY created_at
            "#
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    /// Staff/automation advancement along the fulfillment path.
    ///
    /// ARRIVED_TW -> READY_TO_SHIP is blocked while international
    /// shipping is outstanding (pay through `pay_shipping`). Reaching
    /// RECEIVED settles the hold: the outstanding remainder converts to
    /// a permanent charge.
    pub async fn advance_status(
        &self,
        order_id: &str,
        to: OrderStatus,
    ) -> SettlementResult<Order> {
        if matches!(to, OrderStatus::Cancelled | OrderStatus::Refunded) {
            return Err(SettlementError::InvalidTransition(format!(
                "{} is reached through its own workflow, not a status write",
                to
            )));
        }

        let mut tx = self.pool.begin().await?;
        let order = self.find_for_update_in_tx(&mut tx, order_id).await?;

        if !order.status.can_transition(to) {
            return Err(SettlementError::InvalidTransition(format!(
                "order {} cannot move {} -> {}",
                order_id, order.status, to
            )));
        }
        if order.status == OrderStatus::ArrivedTw
            && to == OrderStatus::ReadyToShip
            && order.shipping_outstanding() > 0
        {
            return Err(SettlementError::InvalidTransition(format!(
                "order {} has {} in unpaid international shipping",
                order_id,
                order.shipping_outstanding()
            )));
        }

        let order = self.write_status_in_tx(&mut tx, order_id, to).await?;

        if let Some(line_status) = line_status_for(to) {
            self.advance_lines_in_tx(&mut tx, order_id, line_status).await?;
        }

        if to == OrderStatus::Received {
            let hold = self.holds.find_by_id(&order.hold_id).await?;
            let outstanding = hold.outstanding();
            if outstanding > 0 {
                self.holds
                    .convert_in_tx(&mut tx, &order.hold_id, outstanding)
                    .await?;
            }
        }

        tx.commit().await?;

        tracing::info!(order_id = %order_id, status = %to, "Order status advanced");

        Ok(order)
    }

    /// Cancel an order before it enters the outbound pipeline: release
    /// the hold remainder and credit it back as a REFUND.
    pub async fn cancel_order(&self, order_id: &str) -> SettlementResult<Order> {
        let mut tx = self.pool.begin().await?;
        let order = self.find_for_update_in_tx(&mut tx, order_id).await?;

        if !order.status.can_transition(OrderStatus::Cancelled) {
            return Err(SettlementError::InvalidTransition(format!(
                "order {} cannot be cancelled from {}",
                order_id, order.status
            )));
        }

        let hold = self.holds.find_by_id(&order.hold_id).await?;
        let outstanding = hold.outstanding();
        if outstanding > 0 {
            self.holds
                .release_in_tx(&mut tx, &order.hold_id, outstanding)
                .await?;
            let cancel_ref = format!("cancel:{}", order_id);
            self.ledger
                .credit_in_tx(
                    &mut tx,
                    &order.user_id,
                    EntryType::Refund,
                    outstanding,
                    Some(ChargeType::Product),
                    Some(&cancel_ref),
                    Some("order cancelled"),
                )
                .await?;
        }

        let order = self
            .write_status_in_tx(&mut tx, order_id, OrderStatus::Cancelled)
            .await?;

        tx.commit().await?;

        tracing::info!(order_id = %order_id, refunded = outstanding, "Order cancelled");

        Ok(order)
    }

    /// Pay the order-level international shipping + box fee, then
    /// advance to READY_TO_SHIP. One PAYMENT entry (charge_type
    /// SHIPPING) debits the live balance; the hold is untouched.
    pub async fn pay_shipping(
        &self,
        order_id: &str,
        user_id: &str,
        external_ref: &str,
    ) -> SettlementResult<Order> {
        let mut tx = self.pool.begin().await?;
        let order = self.find_for_update_in_tx(&mut tx, order_id).await?;

        if order.user_id != user_id {
            return Err(SettlementError::NotFound(format!("order {}", order_id)));
        }

        if self.ledger.already_applied_in_tx(&mut tx, external_ref).await? {
            tx.rollback().await?;
            tracing::info!(
                order_id = %order_id,
                external_ref = %external_ref,
                "Shipping payment already applied, skipping (idempotent)"
            );
            return self.find_by_id(order_id).await;
        }

        if order.status != OrderStatus::ArrivedTw {
            return Err(SettlementError::InvalidTransition(format!(
                "order {} is {}, shipping is settled at ARRIVED_TW",
                order_id, order.status
            )));
        }
        let outstanding = order.shipping_outstanding();
        if outstanding <= 0 {
            return Err(SettlementError::InvalidTransition(format!(
                "order {} has no outstanding shipping",
                order_id
            )));
        }

        self.ledger
            .debit_in_tx(
                &mut tx,
                user_id,
                EntryType::Payment,
                outstanding,
                Some(ChargeType::Shipping),
                Some(external_ref),
                Some("international shipping + box fee"),
            )
            .await?;

        sqlx::query(
            r#"
            UPDATE orders SET shipping_paid = TRUE, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let order = self
            .write_status_in_tx(&mut tx, order_id, OrderStatus::ReadyToShip)
            .await?;

        tx.commit().await?;

        tracing::info!(
            order_id = %order_id,
            amount = outstanding,
            "Shipping paid, order ready to ship"
        );

        Ok(order)
    }

    /// Pay shipping for a subset of lines: each line is validated
    /// (ownership, fee > 0, not already paid), then one aggregate
    /// PAYMENT entry is written and the lines flagged paid.
    pub async fn pay_line_shipping(
        &self,
        user_id: &str,
        line_ids: &[String],
        external_ref: &str,
    ) -> SettlementResult<Vec<OrderLine>> {
        if line_ids.is_empty() {
            return Err(SettlementError::Validation(
                "No lines selected".to_string(),
            ));
        }

        // A repeated id must count into the aggregate payment once.
        let mut seen = HashSet::new();
        let line_ids: Vec<String> = line_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let mut tx = self.pool.begin().await?;

        if self.ledger.already_applied_in_tx(&mut tx, external_ref).await? {
            tx.rollback().await?;
            tracing::info!(
                external_ref = %external_ref,
                "Line shipping payment already applied, skipping (idempotent)"
            );
            return self.lines_by_ids(&line_ids).await;
        }

        let mut total: i64 = 0;
        for line_id in &line_ids {
            let line = sqlx::query_as::<_, OrderLine>(&format!(
                r#"
                SELECT {LINE_COLUMNS} FROM order_lines
                WHERE id = $1
                  AND order_id IN (SELECT id FROM orders WHERE user_id = $2)
                FOR UPDATE
                "#
            ))
            .bind(line_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("order line {}", line_id)))?;

            if line.shipping_paid {
                return Err(SettlementError::InvalidTransition(format!(
                    "line {} shipping already paid",
                    line_id
                )));
            }
            let fee = line.shipping_fee_intl + line.shipping_fee_domestic;
            if fee <= 0 {
                return Err(SettlementError::Validation(format!(
                    "line {} has no shipping fee to pay",
                    line_id
                )));
            }

            total += fee;
        }

        self.ledger
            .debit_in_tx(
                &mut tx,
                user_id,
                EntryType::Payment,
                total,
                Some(ChargeType::Shipping),
                Some(external_ref),
                Some("per-line shipping"),
            )
            .await?;

        let now = Utc::now();
        for line_id in &line_ids {
            sqlx::query(
                r#"
                UPDATE order_lines SET shipping_paid = TRUE, updated_at = $2
                WHERE id = $1
                "#,
            )
            .bind(line_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            lines = line_ids.len(),
            amount = total,
            "Line shipping paid"
        );

        self.lines_by_ids(&line_ids).await
    }

    /// Refund shortage quantities: one REFUND entry credits the sum back,
    /// the hold releases the same amount, and each line's cumulative
    /// refund and status are recomputed. An order whose every line ends
    /// OUT_OF_STOCK transitions to REFUNDED.
    pub async fn refund_shortage(
        &self,
        order_id: &str,
        items: &[RefundItem],
        external_ref: &str,
    ) -> SettlementResult<OrderResponse> {
        if items.is_empty() {
            return Err(SettlementError::Validation(
                "No refund items supplied".to_string(),
            ));
        }

        // A line may appear once per request; duplicates would each
        // validate against the same snapshot and overstate the credit.
        let mut seen = HashSet::new();
        for item in items {
            if !seen.insert(item.line_id.as_str()) {
                return Err(SettlementError::Validation(format!(
                    "Line {} listed more than once",
                    item.line_id
                )));
            }
        }

        let mut tx = self.pool.begin().await?;
        let order = self.find_for_update_in_tx(&mut tx, order_id).await?;

        // Replay detection comes first: a committed refund may have
        // driven the order terminal, and its replay must still no-op.
        if self.ledger.already_applied_in_tx(&mut tx, external_ref).await? {
            tx.rollback().await?;
            tracing::info!(
                order_id = %order_id,
                external_ref = %external_ref,
                "Refund already applied, skipping (idempotent)"
            );
            let order = self.find_by_id(order_id).await?;
            let lines = self.lines_of(order_id).await?;
            return Ok(OrderResponse { order, lines });
        }

        if order.status.is_terminal() {
            return Err(SettlementError::InvalidTransition(format!(
                "order {} is already {}",
                order_id, order.status
            )));
        }

        // Validate every item and compute per-line refunds before any
        // mutation.
        let mut per_line: Vec<(OrderLine, i64)> = Vec::with_capacity(items.len());
        for item in items {
            if item.refund_qty <= 0 {
                return Err(SettlementError::Validation(format!(
                    "Refund quantity for line {} must be positive",
                    item.line_id
                )));
            }

            let line = sqlx::query_as::<_, OrderLine>(&format!(
                r#"
                SELECT {LINE_COLUMNS} FROM order_lines
                WHERE id = $1 AND order_id = $2
                FOR UPDATE
                "#
            ))
            .bind(&item.line_id)
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("order line {}", item.line_id)))?;

            if item.refund_qty > line.qty {
                return Err(SettlementError::Validation(format!(
                    "Refund quantity {} exceeds line quantity {}",
                    item.refund_qty, line.qty
                )));
            }

            let this_refund = line.unit_price * item.refund_qty as i64;
            if line.refund_amount + this_refund > line.line_total() {
                return Err(SettlementError::InvalidTransition(format!(
                    "line {} cumulative refund would exceed its value",
                    line.id
                )));
            }

            per_line.push((line, this_refund));
        }

        let refund_total: i64 = per_line.iter().map(|(_, r)| *r).sum();

        self.holds
            .release_in_tx(&mut tx, &order.hold_id, refund_total)
            .await?;
        self.ledger
            .credit_in_tx(
                &mut tx,
                &order.user_id,
                EntryType::Refund,
                refund_total,
                Some(ChargeType::Product),
                Some(external_ref),
                Some("shortage refund"),
            )
            .await?;

        let now = Utc::now();
        for (line, this_refund) in &per_line {
            let new_refund = line.refund_amount + this_refund;
            let new_status = line.status.after_refund(new_refund, line.line_total());
            sqlx::query(
                r#"
                UPDATE order_lines
                SET refund_amount = $2, status = $3, updated_at = $4
                WHERE id = $1
                "#,
            )
            .bind(&line.id)
            .bind(new_refund)
            .bind(new_status)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        // If the shortage wiped out the whole order, it absorbs into
        // REFUNDED.
        let live_lines: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM order_lines
            WHERE order_id = $1 AND status <> 'OUT_OF_STOCK'
            "#,
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        let order = if live_lines == 0 {
            self.write_status_in_tx(&mut tx, order_id, OrderStatus::Refunded)
                .await?
        } else {
            order
        };

        tx.commit().await?;

        tracing::info!(
            order_id = %order_id,
            refund_total = refund_total,
            "Shortage refund applied"
        );

        let order = self.find_by_id(&order.id).await?;
        let lines = self.lines_of(order_id).await?;
        Ok(OrderResponse { order, lines })
    }

    /// Staff edit of a line's shipping inputs. Fees come from the pure
    /// calculator, so repeating the call with the same inputs stores the
    /// same values.
    pub async fn set_line_shipping(
        &self,
        order_id: &str,
        line_id: &str,
        weight_kg: Decimal,
        country: &str,
        method: crate::models::ShippingMethod,
        rates: &RateTable,
    ) -> SettlementResult<OrderLine> {
        let order = self.find_by_id(order_id).await?;
        if order.status.is_terminal() {
            return Err(SettlementError::InvalidTransition(format!(
                "order {} is {}, lines are settled",
                order_id, order.status
            )));
        }

        let quote = shipping::quote(weight_kg, country, method, rates)?;

        let line = sqlx::query_as::<_, OrderLine>(&format!(
            r#"
            UPDATE order_lines
            SET weight_kg = $3, shipping_fee_intl = $4, shipping_fee_domestic = $5,
                updated_at = $6
            WHERE id = $1 AND order_id = $2 AND shipping_paid = FALSE
            RETURNING {LINE_COLUMNS}
            "#
        ))
        .bind(line_id)
        .bind(order_id)
        .bind(weight_kg)
        .bind(quote.intl_fee)
        .bind(quote.domestic_fee)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        line.ok_or_else(|| {
            SettlementError::InvalidTransition(format!(
                "line {} not found on order {} or already paid",
                line_id, order_id
            ))
        })
    }

    /// Recompute the order-level international fee from line weights and
    /// set the box fee. Only meaningful before the fee is paid.
    pub async fn set_order_shipping(
        &self,
        order_id: &str,
        shipping_fee_intl: i64,
        box_fee: i64,
    ) -> SettlementResult<Order> {
        if shipping_fee_intl < 0 || box_fee < 0 {
            return Err(SettlementError::Validation(
                "Fees must not be negative".to_string(),
            ));
        }

        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders
            SET shipping_fee_intl = $2, box_fee = $3, updated_at = $4
            WHERE id = $1 AND shipping_paid = FALSE
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(shipping_fee_intl)
        .bind(box_fee)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        order.ok_or_else(|| {
            SettlementError::InvalidTransition(format!(
                "order {} not found or shipping already paid",
                order_id
            ))
        })
    }

    // === Helper methods for working within transactions ===

    async fn find_for_update_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order_id: &str,
    ) -> SettlementResult<Order> {
        sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE id = $1
            FOR UPDATE
            "#
        ))
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| SettlementError::NotFound(format!("order {}", order_id)))
    }

    async fn write_status_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order_id: &str,
        to: OrderStatus,
    ) -> SettlementResult<Order> {
        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders SET status = $2, updated_at = $3
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(to)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await?;

        Ok(order)
    }

    /// Move the order's still-progressing lines alongside the order.
    /// Shortage lines (OUT_OF_STOCK / PARTIAL_OOS) keep their status.
    async fn advance_lines_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order_id: &str,
        to: LineStatus,
    ) -> SettlementResult<()> {
        sqlx::query(
            r#"
            UPDATE order_lines
            SET status = $2, updated_at = $3
            WHERE order_id = $1
              AND status IN ('NORMAL', 'ALLOCATED', 'IN_TRANSIT', 'ARRIVED', 'SHIPPED')
            "#,
        )
        .bind(order_id)
        .bind(to)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn lines_by_ids(&self, line_ids: &[String]) -> SettlementResult<Vec<OrderLine>> {
        let lines = sqlx::query_as::<_, OrderLine>(&format!(
            r#"
            SELECT {LINE_COLUMNS} FROM order_lines
            WHERE id = ANY($1)
            ORDER BY created_at
            "#
        ))
        .bind(line_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }
}

/// The line-status step that accompanies an order-status step, if any.
fn line_status_for(status: OrderStatus) -> Option<LineStatus> {
    match status {
        OrderStatus::Picking => Some(LineStatus::Allocated),
        OrderStatus::Charged => Some(LineStatus::InTransit),
        OrderStatus::ArrivedTw => Some(LineStatus::Arrived),
        OrderStatus::Shipped => Some(LineStatus::Shipped),
        OrderStatus::Received => Some(LineStatus::Received),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_statuses_track_order_progress() {
        assert_eq!(
            line_status_for(OrderStatus::Picking),
            Some(LineStatus::Allocated)
        );
        assert_eq!(
            line_status_for(OrderStatus::Received),
            Some(LineStatus::Received)
        );
        assert_eq!(line_status_for(OrderStatus::Pending), None);
        assert_eq!(line_status_for(OrderStatus::ReadyToShip), None);
    }
}
