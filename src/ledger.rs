use crate::errors::{SettlementError, SettlementResult};
use crate::models::{AccountBalance, ChargeType, EntryType, LedgerEntry};
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// The ledger store owns every write to `balances` and `ledger_entries`.
///
/// Design principle: the append-only ledger is the source of truth and
/// the balance row is a cache mirrored in the same database transaction.
/// No other module writes either table, so the invariant
/// `balance == signed sum of entries` holds structurally.
///
/// The `_in_tx` methods take an open transaction so workflow modules
/// (orders, membership) can compose a ledger write with their own rows
/// and commit or roll back as one unit.
#[derive(Clone)]
pub struct LedgerStore {
    pool: PgPool,
}

impl LedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the balance row on first contact with a user.
    pub async fn ensure_account(&self, user_id: &str) -> SettlementResult<()> {
        sqlx::query(
            r#"
            INSERT INTO balances (user_id, balance, created_at, updated_at)
            VALUES ($1, 0, $2, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn balance_of(&self, user_id: &str) -> SettlementResult<i64> {
        let balance: Option<i64> =
            sqlx::query_scalar(r#"SELECT balance FROM balances WHERE user_id = $1"#)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        balance.ok_or_else(|| SettlementError::NotFound(format!("account {}", user_id)))
    }

    pub async fn account(&self, user_id: &str) -> SettlementResult<AccountBalance> {
        sqlx::query_as::<_, AccountBalance>(
            r#"
            SELECT user_id, balance, created_at, updated_at
            FROM balances
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SettlementError::NotFound(format!("account {}", user_id)))
    }

    /// Full movement history, newest first.
    pub async fn history(&self, user_id: &str) -> SettlementResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, user_id, entry_type, amount, charge_type, external_ref, note, created_at
            FROM ledger_entries
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Idempotent-replay probe: has this logical operation already been
    /// applied? A retried client request with the same `external_ref`
    /// must be a no-op, not a second mutation.
    pub async fn already_applied_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        external_ref: &str,
    ) -> SettlementResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM ledger_entries
                WHERE external_ref = $1
            )
            "#,
        )
        .bind(external_ref)
        .fetch_one(&mut **tx)
        .await?;

        Ok(exists)
    }

    /// Same probe outside a transaction, for early exits.
    pub async fn already_applied(&self, external_ref: &str) -> SettlementResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM ledger_entries
                WHERE external_ref = $1
            )
            "#,
        )
        .bind(external_ref)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Append a crediting entry (TOPUP | REFUND) and mirror it into the
    /// balance cache. Returns the entry and the new balance.
    pub async fn credit_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        entry_type: EntryType,
        amount: i64,
        charge_type: Option<ChargeType>,
        external_ref: Option<&str>,
        note: Option<&str>,
    ) -> SettlementResult<(LedgerEntry, i64)> {
        if !entry_type.is_credit() {
            return Err(SettlementError::Internal(format!(
                "credit_in_tx called with debiting type {}",
                entry_type
            )));
        }
        if amount <= 0 {
            return Err(SettlementError::Validation(
                "Amount must be positive".to_string(),
            ));
        }

        let new_balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE balances
            SET balance = balance + $2, updated_at = $3
            WHERE user_id = $1
            RETURNING balance
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(Utc::now())
        .fetch_optional(&mut **tx)
        .await?;

        let new_balance = new_balance
            .ok_or_else(|| SettlementError::NotFound(format!("account {}", user_id)))?;

        let entry = self
            .insert_entry_in_tx(tx, user_id, entry_type, amount, charge_type, external_ref, note)
            .await?;

        Ok((entry, new_balance))
    }

    /// Append a debiting entry (HOLD | PAYMENT | DEBIT) with a guarded
    /// compare-and-swap on the balance.
    ///
    /// The update only matches when `balance >= amount`, so two racing
    /// debits on the same account can never both succeed past the funds
    /// available; the loser observes zero rows affected and gets an
    /// `InsufficientFunds` built from a re-read of the current balance.
    pub async fn debit_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        entry_type: EntryType,
        amount: i64,
        charge_type: Option<ChargeType>,
        external_ref: Option<&str>,
        note: Option<&str>,
    ) -> SettlementResult<(LedgerEntry, i64)> {
        if entry_type.is_credit() {
            return Err(SettlementError::Internal(format!(
                "debit_in_tx called with crediting type {}",
                entry_type
            )));
        }
        if amount <= 0 {
            return Err(SettlementError::Validation(
                "Amount must be positive".to_string(),
            ));
        }

        let new_balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE balances
            SET balance = balance - $2, updated_at = $3
            WHERE user_id = $1 AND balance >= $2
            RETURNING balance
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(Utc::now())
        .fetch_optional(&mut **tx)
        .await?;

        let new_balance = match new_balance {
            Some(b) => b,
            None => {
                // Either the account is missing or the guard failed;
                // re-read to report which.
                let current: Option<i64> =
                    sqlx::query_scalar(r#"SELECT balance FROM balances WHERE user_id = $1"#)
                        .bind(user_id)
                        .fetch_optional(&mut **tx)
                        .await?;

                return match current {
                    Some(current) => Err(SettlementError::InsufficientFunds {
                        required: amount,
                        current,
                    }),
                    None => Err(SettlementError::NotFound(format!("account {}", user_id))),
                };
            }
        };

        let entry = self
            .insert_entry_in_tx(tx, user_id, entry_type, amount, charge_type, external_ref, note)
            .await?;

        Ok((entry, new_balance))
    }

    /// Debit with a higher eligibility floor: the guard requires
    /// `balance >= floor` even though only `amount` is taken. Used by
    /// the wholesale upgrade, where the fee may only be debited from a
    /// balance that also clears the tier minimum. Reports the floor as
    /// the required amount on failure.
    pub async fn debit_with_floor_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        entry_type: EntryType,
        amount: i64,
        floor: i64,
        external_ref: Option<&str>,
        note: Option<&str>,
    ) -> SettlementResult<(LedgerEntry, i64)> {
        if entry_type.is_credit() {
            return Err(SettlementError::Internal(format!(
                "debit_with_floor_in_tx called with crediting type {}",
                entry_type
            )));
        }
        if amount <= 0 || floor < amount {
            return Err(SettlementError::Validation(
                "Amount must be positive and within the floor".to_string(),
            ));
        }

        let new_balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE balances
            SET balance = balance - $2, updated_at = $4
            WHERE user_id = $1 AND balance >= $3
            RETURNING balance
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(floor)
        .bind(Utc::now())
        .fetch_optional(&mut **tx)
        .await?;

        let new_balance = match new_balance {
            Some(b) => b,
            None => {
                let current: Option<i64> =
                    sqlx::query_scalar(r#"SELECT balance FROM balances WHERE user_id = $1"#)
                        .bind(user_id)
                        .fetch_optional(&mut **tx)
                        .await?;

                return match current {
                    Some(current) => Err(SettlementError::InsufficientFunds {
                        required: floor,
                        current,
                    }),
                    None => Err(SettlementError::NotFound(format!("account {}", user_id))),
                };
            }
        };

        let entry = self
            .insert_entry_in_tx(tx, user_id, entry_type, amount, None, external_ref, note)
            .await?;

        Ok((entry, new_balance))
    }

    /// Staff top-up: its own unit of work. Creates the account row on
    /// first use; a replayed `external_ref` returns the prior balance
    /// without a second credit.
    pub async fn top_up(
        &self,
        user_id: &str,
        amount: i64,
        external_ref: &str,
        note: Option<&str>,
    ) -> SettlementResult<(Option<LedgerEntry>, i64)> {
        if amount <= 0 {
            return Err(SettlementError::Validation(
                "Top-up amount must be positive".to_string(),
            ));
        }

        self.ensure_account(user_id).await?;

        let mut tx = self.pool.begin().await?;

        if self.already_applied_in_tx(&mut tx, external_ref).await? {
            tx.rollback().await?;
            let balance = self.balance_of(user_id).await?;
            tracing::info!(
                user_id = %user_id,
                external_ref = %external_ref,
                "Top-up already applied, skipping (idempotent)"
            );
            return Ok((None, balance));
        }

        let (entry, new_balance) = self
            .credit_in_tx(
                &mut tx,
                user_id,
                EntryType::Topup,
                amount,
                None,
                Some(external_ref),
                note,
            )
            .await?;

        tx.commit().await?;

        Ok((Some(entry), new_balance))
    }

    /// Insert one immutable ledger row. Private: every write path above
    /// pairs it with the matching balance mutation.
    async fn insert_entry_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        entry_type: EntryType,
        amount: i64,
        charge_type: Option<ChargeType>,
        external_ref: Option<&str>,
        note: Option<&str>,
    ) -> SettlementResult<LedgerEntry> {
        let entry_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            INSERT INTO ledger_entries
                (id, user_id, entry_type, amount, charge_type, external_ref, note, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, user_id, entry_type, amount, charge_type, external_ref, note, created_at
            "#,
        )
        .bind(&entry_id)
        .bind(user_id)
        .bind(entry_type)
        .bind(amount)
        .bind(charge_type)
        .bind(external_ref)
        .bind(note)
        .bind(now)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| match e {
            // Unique violation on external_ref: a concurrent replay of
            // the same logical operation won the race.
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                SettlementError::Conflict
            }
            other => SettlementError::Database(other),
        })?;

        Ok(entry)
    }
}
