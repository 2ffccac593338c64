use crate::config::PolicyConfig;
use crate::errors::{SettlementError, SettlementResult};
use crate::ledger::LedgerStore;
use crate::models::{EntryType, Profile, SweepDisabled, SweepReport, Tier, UpgradeResponse};
use chrono::{Duration, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};

const PROFILE_COLUMNS: &str = "user_id, tier, login_enabled, login_disabled_at, \
     login_disabled_reason, last_purchase_date, tier_upgraded_at, tier_upgraded_from, \
     registered_at";

/// Membership tier engine.
///
/// Owns the `profiles` table and is the sole writer of `login_enabled`.
/// Tier moves are a strict progression (guest -> retail -> wholesale);
/// vip is assigned out-of-band and never through this engine.
#[derive(Clone)]
pub struct TierEngine {
    pool: PgPool,
    ledger: LedgerStore,
    policy: PolicyConfig,
}

impl TierEngine {
    pub fn new(pool: PgPool, ledger: LedgerStore, policy: PolicyConfig) -> Self {
        Self {
            pool,
            ledger,
            policy,
        }
    }

    /// Fetch the caller's profile, creating a guest profile (and the
    /// backing balance row) on first contact.
    pub async fn get_or_create_profile(&self, user_id: &str) -> SettlementResult<Profile> {
        self.ledger.ensure_account(user_id).await?;

        sqlx::query(
            r#"
            INSERT INTO profiles (user_id, tier, login_enabled, registered_at)
            VALUES ($1, 'guest', TRUE, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.profile_of(user_id).await
    }

    pub async fn profile_of(&self, user_id: &str) -> SettlementResult<Profile> {
        sqlx::query_as::<_, Profile>(&format!(
            r#"SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = $1"#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SettlementError::NotFound(format!("profile {}", user_id)))
    }

    /// Stamp the buyer's latest purchase date. The order workflow calls
    /// this inside its own transaction; profile writes stay in this
    /// module.
    pub async fn record_purchase_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        date: NaiveDate,
    ) -> SettlementResult<()> {
        sqlx::query(
            r#"
            UPDATE profiles
            SET last_purchase_date = $2
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(date)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Self-service tier upgrade.
    ///
    /// guest -> retail requires `balance >= retail_min` and writes only
    /// the profile. retail -> wholesale requires
    /// `balance >= wholesale_min + agency_fee`; the fee DEBIT and the
    /// tier write share one transaction, so neither is observable
    /// without the other.
    pub async fn upgrade(&self, user_id: &str, target: Tier) -> SettlementResult<UpgradeResponse> {
        let profile = self.get_or_create_profile(user_id).await?;

        match (profile.tier, target) {
            (Tier::Guest, Tier::Retail) => self.upgrade_to_retail(user_id).await,
            (Tier::Retail, Tier::Wholesale) => self.upgrade_to_wholesale(user_id).await,
            (current, Tier::Vip) => Err(SettlementError::InvalidTransition(format!(
                "vip is not a self-service upgrade (current tier {})",
                current
            ))),
            (current, requested) => Err(SettlementError::InvalidTransition(format!(
                "cannot upgrade from {} to {}",
                current, requested
            ))),
        }
    }

    async fn upgrade_to_retail(&self, user_id: &str) -> SettlementResult<UpgradeResponse> {
        let balance = self.ledger.balance_of(user_id).await?;
        if balance < self.policy.retail_min {
            return Err(SettlementError::InsufficientFunds {
                required: self.policy.retail_min,
                current: balance,
            });
        }

        // Guarded on the current tier: a concurrent upgrade loses here
        // instead of double-applying.
        let rows = sqlx::query(
            r#"
            UPDATE profiles
            SET tier = 'retail', tier_upgraded_at = $2, tier_upgraded_from = 'guest'
            WHERE user_id = $1 AND tier = 'guest'
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(SettlementError::Conflict);
        }

        tracing::info!(user_id = %user_id, "Upgraded to retail");

        Ok(UpgradeResponse {
            user_id: user_id.to_string(),
            tier: Tier::Retail,
            upgraded_from: Tier::Guest,
            fee_debited: 0,
            balance,
        })
    }

    async fn upgrade_to_wholesale(&self, user_id: &str) -> SettlementResult<UpgradeResponse> {
        let required = self.policy.wholesale_required();
        let fee_ref = format!("agency-fee:{}", user_id);

        let mut tx = self.pool.begin().await?;

        if self.ledger.already_applied_in_tx(&mut tx, &fee_ref).await? {
            // The fee was debited before; the only way to get here with
            // tier retail is a crashed earlier attempt, which the
            // transaction boundary rules out.
            return Err(SettlementError::InvalidTransition(format!(
                "agency fee already debited for {}",
                user_id
            )));
        }

        // Fee comes out only when the balance also clears the tier
        // minimum; failure reports the full required amount.
        let (_, new_balance) = self
            .ledger
            .debit_with_floor_in_tx(
                &mut tx,
                user_id,
                EntryType::Debit,
                self.policy.agency_fee,
                required,
                Some(&fee_ref),
                Some("wholesale agency fee"),
            )
            .await?;

        let rows = sqlx::query(
            r#"
            UPDATE profiles
            SET tier = 'wholesale', tier_upgraded_at = $2, tier_upgraded_from = 'retail'
            WHERE user_id = $1 AND tier = 'retail'
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows == 0 {
            // Tier changed underneath us; rolling back also voids the
            // fee debit.
            return Err(SettlementError::Conflict);
        }

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            fee = self.policy.agency_fee,
            "Upgraded to wholesale"
        );

        Ok(UpgradeResponse {
            user_id: user_id.to_string(),
            tier: Tier::Wholesale,
            upgraded_from: Tier::Retail,
            fee_debited: self.policy.agency_fee,
            balance: new_balance,
        })
    }

    /// Maintenance sweep: disable login for retail/wholesale accounts
    /// older than the age threshold whose qualifying spend over the
    /// trailing window is below the minimum.
    ///
    /// Qualifying spend sums `total` of the account's orders in the
    /// window, excluding only CANCELLED and REFUNDED. Each account is
    /// its own unit of work, so one failure is logged and skipped rather
    /// than aborting the batch. Re-running is a no-op for accounts
    /// already disabled (only enabled ones are selected).
    pub async fn run_sweep(&self) -> SettlementResult<SweepReport> {
        let now = Utc::now();
        let age_cutoff = now - Duration::days(self.policy.account_age_days);
        let window_start = now - Duration::days(self.policy.sweep_window_days);

        let candidates: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT user_id FROM profiles
            WHERE login_enabled = TRUE
              AND tier IN ('retail', 'wholesale')
              AND registered_at < $1
            ORDER BY user_id
            "#,
        )
        .bind(age_cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut report = SweepReport::default();

        for user_id in candidates {
            report.evaluated += 1;
            match self.sweep_account(&user_id, window_start).await {
                Ok(Some(reason)) => report.disabled.push(SweepDisabled { user_id, reason }),
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(user_id = %user_id, error = %e, "Sweep evaluation failed");
                }
            }
        }

        tracing::info!(
            evaluated = report.evaluated,
            disabled = report.disabled.len(),
            failed = report.failed,
            "Maintenance sweep finished"
        );

        Ok(report)
    }

    async fn sweep_account(
        &self,
        user_id: &str,
        window_start: chrono::DateTime<Utc>,
    ) -> SettlementResult<Option<String>> {
        let spend: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(total), 0)::BIGINT FROM orders
            WHERE user_id = $1
              AND created_at >= $2
              AND status NOT IN ('CANCELLED', 'REFUNDED')
            "#,
        )
        .bind(user_id)
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;

        if spend >= self.policy.sweep_min_spend {
            return Ok(None);
        }

        let reason = format!(
            "spend {} below minimum {} over trailing {} days",
            spend, self.policy.sweep_min_spend, self.policy.sweep_window_days
        );

        let rows = sqlx::query(
            r#"
            UPDATE profiles
            SET login_enabled = FALSE, login_disabled_at = $2, login_disabled_reason = $3
            WHERE user_id = $1 AND login_enabled = TRUE
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .bind(&reason)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            tracing::info!(user_id = %user_id, reason = %reason, "Login disabled by sweep");
            Ok(Some(reason))
        } else {
            Ok(None)
        }
    }
}
