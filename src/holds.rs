use crate::errors::{SettlementError, SettlementResult};
use crate::models::{HoldState, WalletHold};
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Hold store - funds frozen against one order.
///
/// A hold is created FROZEN when the order's funds are debited, and the
/// frozen amount is then split between `amount_converted` (permanently
/// spent) and `amount_released` (credited back) as fulfillment plays
/// out. The guard `amount_converted + amount_released <= amount_total`
/// is enforced in the UPDATE's WHERE clause, so an over-release matches
/// zero rows and leaves no state change.
///
/// Releasing only mutates the hold; the paired REFUND credit is the
/// caller's ledger write in the same transaction.
#[derive(Clone)]
pub struct HoldStore {
    pool: PgPool,
}

impl HoldStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a FROZEN hold. The order id is linked after the order row
    /// exists, inside the same order-creation transaction.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        amount_total: i64,
    ) -> SettlementResult<WalletHold> {
        if amount_total <= 0 {
            return Err(SettlementError::Validation(
                "Hold amount must be positive".to_string(),
            ));
        }

        let hold_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let hold = sqlx::query_as::<_, WalletHold>(
            r#"
            INSERT INTO wallet_holds
                (id, user_id, order_id, state, amount_total, amount_converted,
                 amount_released, created_at, updated_at)
            VALUES ($1, $2, NULL, 'FROZEN', $3, 0, 0, $4, $4)
            RETURNING id, user_id, order_id, state, amount_total, amount_converted,
                      amount_released, created_at, updated_at
            "#,
        )
        .bind(&hold_id)
        .bind(user_id)
        .bind(amount_total)
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;

        Ok(hold)
    }

    pub async fn link_order_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        hold_id: &str,
        order_id: &str,
    ) -> SettlementResult<()> {
        let rows = sqlx::query(
            r#"
            UPDATE wallet_holds
            SET order_id = $2, updated_at = $3
            WHERE id = $1 AND order_id IS NULL
            "#,
        )
        .bind(hold_id)
        .bind(order_id)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(SettlementError::Conflict);
        }

        Ok(())
    }

    pub async fn find_by_id(&self, hold_id: &str) -> SettlementResult<WalletHold> {
        sqlx::query_as::<_, WalletHold>(
            r#"
            SELECT id, user_id, order_id, state, amount_total, amount_converted,
                   amount_released, created_at, updated_at
            FROM wallet_holds
            WHERE id = $1
            "#,
        )
        .bind(hold_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SettlementError::NotFound(format!("hold {}", hold_id)))
    }

    /// Convert frozen funds into a permanent charge. The money was
    /// already debited at freeze time, so no balance movement happens
    /// here. Exhausting the hold settles it as CONVERTED.
    pub async fn convert_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        hold_id: &str,
        amount: i64,
    ) -> SettlementResult<WalletHold> {
        self.apply_in_tx(tx, hold_id, amount, HoldOp::Convert).await
    }

    /// Return frozen funds to the wallet. Exhausting the hold settles it
    /// as RELEASED. The caller must pair this with a REFUND ledger
    /// credit in the same transaction.
    pub async fn release_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        hold_id: &str,
        amount: i64,
    ) -> SettlementResult<WalletHold> {
        self.apply_in_tx(tx, hold_id, amount, HoldOp::Release).await
    }

    async fn apply_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        hold_id: &str,
        amount: i64,
        op: HoldOp,
    ) -> SettlementResult<WalletHold> {
        if amount <= 0 {
            return Err(SettlementError::Validation(
                "Hold transition amount must be positive".to_string(),
            ));
        }

        // Guard and terminal-state computation happen in one statement:
        // the WHERE clause rejects over-allocation, the CASE settles the
        // state according to which column exhausted the total.
        let sql = match op {
            HoldOp::Convert => {
                r#"
                UPDATE wallet_holds
                SET amount_converted = amount_converted + $2,
                    state = CASE
                        WHEN amount_converted + $2 + amount_released = amount_total
                        THEN 'CONVERTED' ELSE 'FROZEN'
                    END,
                    updated_at = $3
                WHERE id = $1
                  AND state = 'FROZEN'
                  AND amount_converted + amount_released + $2 <= amount_total
                RETURNING id, user_id, order_id, state, amount_total, amount_converted,
                          amount_released, created_at, updated_at
                "#
            }
            HoldOp::Release => {
                r#"
                UPDATE wallet_holds
                SET amount_released = amount_released + $2,
                    state = CASE
                        WHEN amount_released + $2 + amount_converted = amount_total
                        THEN 'RELEASED' ELSE 'FROZEN'
                    END,
                    updated_at = $3
                WHERE id = $1
                  AND state = 'FROZEN'
                  AND amount_converted + amount_released + $2 <= amount_total
                RETURNING id, user_id, order_id, state, amount_total, amount_converted,
                          amount_released, created_at, updated_at
                "#
            }
        };

        let hold = sqlx::query_as::<_, WalletHold>(sql)
            .bind(hold_id)
            .bind(amount)
            .bind(Utc::now())
            .fetch_optional(&mut **tx)
            .await?;

        match hold {
            Some(hold) => Ok(hold),
            None => {
                // Distinguish a missing hold from an over-release.
                let existing = sqlx::query_as::<_, WalletHold>(
                    r#"
                    SELECT id, user_id, order_id, state, amount_total, amount_converted,
                           amount_released, created_at, updated_at
                    FROM wallet_holds
                    WHERE id = $1
                    "#,
                )
                .bind(hold_id)
                .fetch_optional(&mut **tx)
                .await?;

                match existing {
                    Some(h) if h.state != HoldState::Frozen => {
                        Err(SettlementError::InvalidTransition(format!(
                            "hold {} is {}, not FROZEN",
                            hold_id, h.state
                        )))
                    }
                    Some(h) => Err(SettlementError::OverRelease {
                        hold_id: hold_id.to_string(),
                        requested: amount,
                        available: h.outstanding(),
                    }),
                    None => Err(SettlementError::NotFound(format!("hold {}", hold_id))),
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
enum HoldOp {
    Convert,
    Release,
}
