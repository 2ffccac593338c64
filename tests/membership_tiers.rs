/// Integration tests for the membership tier engine and the login sweep.
///
/// Requires PostgreSQL (TEST_DATABASE_URL). Run with:
/// cargo test --test membership_tiers -- --test-threads=1
mod common;

use common::*;
use settlement_service::errors::SettlementError;
use settlement_service::models::Tier;

async fn set_tier(pool: &sqlx::PgPool, user_id: &str, tier: &str) {
    sqlx::query("UPDATE profiles SET tier = $2 WHERE user_id = $1")
        .bind(user_id)
        .bind(tier)
        .execute(pool)
        .await
        .unwrap();
}

async fn backdate_registration(pool: &sqlx::PgPool, user_id: &str, days: i32) {
    sqlx::query(
        "UPDATE profiles SET registered_at = NOW() - make_interval(days => $2) WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(days)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn retail_upgrade_requires_the_minimum_balance() {
    let pool = setup_test_db().await;
    let stores = build_stores(&pool);

    funded_user(&stores, "member-1", 1400).await;

    let result = stores.membership.upgrade("member-1", Tier::Retail).await;
    match result.unwrap_err() {
        SettlementError::InsufficientFunds { required, current } => {
            assert_eq!(required, 1500);
            assert_eq!(current, 1400);
        }
        e => panic!("Expected InsufficientFunds, got {:?}", e),
    }

    // Nothing changed
    let profile = stores.membership.profile_of("member-1").await.unwrap();
    assert_eq!(profile.tier, Tier::Guest);
    assert_eq!(stores.ledger.balance_of("member-1").await.unwrap(), 1400);

    cleanup_test_data(&pool).await;
}

#[tokio::test]
async fn retail_upgrade_is_free_at_the_threshold() {
    let pool = setup_test_db().await;
    let stores = build_stores(&pool);

    funded_user(&stores, "member-2", 1500).await;

    let upgraded = stores
        .membership
        .upgrade("member-2", Tier::Retail)
        .await
        .unwrap();
    assert_eq!(upgraded.tier, Tier::Retail);
    assert_eq!(upgraded.upgraded_from, Tier::Guest);
    assert_eq!(upgraded.fee_debited, 0);

    // The retail upgrade only checks the balance, it never debits
    assert_eq!(stores.ledger.balance_of("member-2").await.unwrap(), 1500);

    let profile = stores.membership.profile_of("member-2").await.unwrap();
    assert_eq!(profile.tier, Tier::Retail);
    assert_eq!(profile.tier_upgraded_from, Some(Tier::Guest));
    assert!(profile.tier_upgraded_at.is_some());

    cleanup_test_data(&pool).await;
}

#[tokio::test]
async fn wholesale_upgrade_debits_the_agency_fee() {
    let pool = setup_test_db().await;
    let stores = build_stores(&pool);

    funded_user(&stores, "member-3", 11_500).await;
    stores.membership.upgrade("member-3", Tier::Retail).await.unwrap();

    let upgraded = stores
        .membership
        .upgrade("member-3", Tier::Wholesale)
        .await
        .unwrap();
    assert_eq!(upgraded.tier, Tier::Wholesale);
    assert_eq!(upgraded.fee_debited, 6000);
    assert_eq!(upgraded.balance, 5500);

    assert_eq!(stores.ledger.balance_of("member-3").await.unwrap(), 5500);

    // Exactly one DEBIT entry for the fee
    let (count, sum): (i64, Option<i64>) = sqlx::query_as(
        "SELECT COUNT(*), SUM(amount)::BIGINT FROM ledger_entries \
         WHERE user_id = $1 AND entry_type = 'DEBIT'",
    )
    .bind("member-3")
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 1);
    assert_eq!(sum, Some(6000));

    assert_balance_matches_ledger(&pool, "member-3").await;

    cleanup_test_data(&pool).await;
}

#[tokio::test]
async fn wholesale_upgrade_requires_minimum_plus_fee() {
    let pool = setup_test_db().await;
    let stores = build_stores(&pool);

    funded_user(&stores, "member-4", 10_999).await;
    stores.membership.upgrade("member-4", Tier::Retail).await.unwrap();

    let result = stores.membership.upgrade("member-4", Tier::Wholesale).await;
    match result.unwrap_err() {
        SettlementError::InsufficientFunds { required, current } => {
            assert_eq!(required, 11_000);
            assert_eq!(current, 10_999);
        }
        e => panic!("Expected InsufficientFunds, got {:?}", e),
    }

    // The failed attempt left no trace: tier and balance intact, no fee
    let profile = stores.membership.profile_of("member-4").await.unwrap();
    assert_eq!(profile.tier, Tier::Retail);
    assert_eq!(stores.ledger.balance_of("member-4").await.unwrap(), 10_999);

    let debits: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ledger_entries WHERE user_id = $1 AND entry_type = 'DEBIT'",
    )
    .bind("member-4")
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(debits, 0);

    cleanup_test_data(&pool).await;
}

#[tokio::test]
async fn tier_moves_are_a_strict_progression() {
    let pool = setup_test_db().await;
    let stores = build_stores(&pool);

    funded_user(&stores, "member-5", 20_000).await;

    // Guest cannot skip straight to wholesale
    assert!(matches!(
        stores
            .membership
            .upgrade("member-5", Tier::Wholesale)
            .await
            .unwrap_err(),
        SettlementError::InvalidTransition(_)
    ));

    // Vip is never self-service
    assert!(matches!(
        stores
            .membership
            .upgrade("member-5", Tier::Vip)
            .await
            .unwrap_err(),
        SettlementError::InvalidTransition(_)
    ));

    stores.membership.upgrade("member-5", Tier::Retail).await.unwrap();

    // Re-requesting the current tier is rejected
    assert!(matches!(
        stores
            .membership
            .upgrade("member-5", Tier::Retail)
            .await
            .unwrap_err(),
        SettlementError::InvalidTransition(_)
    ));

    cleanup_test_data(&pool).await;
}

#[tokio::test]
async fn sweep_disables_inactive_aged_accounts() {
    let pool = setup_test_db().await;
    let stores = build_stores(&pool);

    funded_user(&stores, "sweep-1", 0).await;
    set_tier(&pool, "sweep-1", "retail").await;
    backdate_registration(&pool, "sweep-1", 60).await;

    let report = stores.membership.run_sweep().await.unwrap();
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.disabled.len(), 1);
    assert_eq!(report.disabled[0].user_id, "sweep-1");
    assert_eq!(report.failed, 0);

    let profile = stores.membership.profile_of("sweep-1").await.unwrap();
    assert!(!profile.login_enabled);
    assert!(profile.login_disabled_at.is_some());
    assert!(profile.login_disabled_reason.is_some());

    // Re-running leaves the already-disabled account alone
    let rerun = stores.membership.run_sweep().await.unwrap();
    assert_eq!(rerun.evaluated, 0);
    assert!(rerun.disabled.is_empty());

    cleanup_test_data(&pool).await;
}

#[tokio::test]
async fn sweep_spares_accounts_with_qualifying_spend() {
    let pool = setup_test_db().await;
    let stores = build_stores(&pool);

    seed_product(&pool, "sweep-prod", 1, None, 300).await;
    funded_user(&stores, "sweep-2", 1000).await;
    let _ = stores
        .orders
        .create_order("sweep-2", Tier::Guest, &order_request("sweep-order-2", "sweep-prod", 1))
        .await
        .unwrap();

    set_tier(&pool, "sweep-2", "retail").await;
    backdate_registration(&pool, "sweep-2", 60).await;

    let report = stores.membership.run_sweep().await.unwrap();
    assert_eq!(report.evaluated, 1);
    assert!(report.disabled.is_empty());

    let profile = stores.membership.profile_of("sweep-2").await.unwrap();
    assert!(profile.login_enabled);

    cleanup_test_data(&pool).await;
}

#[tokio::test]
async fn sweep_ignores_cancelled_orders_as_spend() {
    let pool = setup_test_db().await;
    let stores = build_stores(&pool);

    seed_product(&pool, "sweep-prod-b", 1, None, 500).await;
    funded_user(&stores, "sweep-3", 1000).await;
    let created = stores
        .orders
        .create_order("sweep-3", Tier::Guest, &order_request("sweep-order-3", "sweep-prod-b", 1))
        .await
        .unwrap();
    stores.orders.cancel_order(&created.order.id).await.unwrap();

    set_tier(&pool, "sweep-3", "retail").await;
    backdate_registration(&pool, "sweep-3", 60).await;

    // The cancelled 500 does not count: below the 300 minimum
    let report = stores.membership.run_sweep().await.unwrap();
    assert_eq!(report.disabled.len(), 1);
    assert_eq!(report.disabled[0].user_id, "sweep-3");

    cleanup_test_data(&pool).await;
}

#[tokio::test]
async fn sweep_skips_young_accounts_and_guests() {
    let pool = setup_test_db().await;
    let stores = build_stores(&pool);

    // Retail but registered recently
    funded_user(&stores, "sweep-4", 0).await;
    set_tier(&pool, "sweep-4", "retail").await;
    backdate_registration(&pool, "sweep-4", 10).await;

    // Old but still guest
    funded_user(&stores, "sweep-5", 0).await;
    backdate_registration(&pool, "sweep-5", 60).await;

    let report = stores.membership.run_sweep().await.unwrap();
    assert_eq!(report.evaluated, 0);
    assert!(report.disabled.is_empty());

    for user_id in ["sweep-4", "sweep-5"] {
        let profile = stores.membership.profile_of(user_id).await.unwrap();
        assert!(profile.login_enabled, "{} must stay enabled", user_id);
    }

    cleanup_test_data(&pool).await;
}
