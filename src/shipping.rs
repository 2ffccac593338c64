use crate::errors::{SettlementError, SettlementResult};
use crate::models::ShippingMethod;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;

/// Country key holding the generic per-kg fallback rate.
const GENERIC_COUNTRY: &str = "*";

/// Shipping rate table, supplied as configuration.
///
/// Weights and per-kg rates are `Decimal` (fractional is real here);
/// computed fees are i64 in the smallest currency unit.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    pub per_kg_by_country: HashMap<String, Decimal>,
    pub generic_per_kg: Option<Decimal>,
    pub flat_by_method: HashMap<ShippingMethod, i64>,
}

/// A computed shipping fee pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShippingQuote {
    pub intl_fee: i64,
    pub domestic_fee: i64,
}

/// Pure fee calculation: deterministic, no side effects, safe to call
/// repeatedly while a line is edited before settlement.
///
/// International: `ceil(weight * rate_for_country)`, falling back to the
/// generic per-kg rate, and to 0 when neither exists. Domestic: flat
/// lookup by method; COLLECT is always 0 (the recipient settles the
/// carrier directly).
pub fn quote(
    weight_kg: Decimal,
    country: &str,
    method: ShippingMethod,
    rates: &RateTable,
) -> SettlementResult<ShippingQuote> {
    if weight_kg < Decimal::ZERO {
        return Err(SettlementError::Validation(
            "Weight must not be negative".to_string(),
        ));
    }

    let per_kg = rates
        .per_kg_by_country
        .get(country)
        .copied()
        .or(rates.generic_per_kg);

    let intl_fee = match per_kg {
        Some(rate) => (weight_kg * rate).ceil().to_i64().ok_or_else(|| {
            SettlementError::Validation("Shipping fee out of range".to_string())
        })?,
        None => 0,
    };

    let domestic_fee = match method {
        ShippingMethod::Collect => 0,
        other => rates.flat_by_method.get(&other).copied().unwrap_or(0),
    };

    Ok(ShippingQuote {
        intl_fee,
        domestic_fee,
    })
}

/// Loads and edits the persisted rate table.
#[derive(Clone)]
pub struct RateStore {
    pool: PgPool,
}

impl RateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn load(&self) -> SettlementResult<RateTable> {
        let country_rows: Vec<(String, Decimal)> =
            sqlx::query_as(r#"SELECT country, per_kg FROM shipping_country_rates"#)
                .fetch_all(&self.pool)
                .await?;

        let method_rows: Vec<(ShippingMethod, i64)> =
            sqlx::query_as(r#"SELECT method, flat_fee FROM shipping_method_rates"#)
                .fetch_all(&self.pool)
                .await?;

        let mut table = RateTable::default();
        for (country, per_kg) in country_rows {
            if country == GENERIC_COUNTRY {
                table.generic_per_kg = Some(per_kg);
            } else {
                table.per_kg_by_country.insert(country, per_kg);
            }
        }
        for (method, flat_fee) in method_rows {
            table.flat_by_method.insert(method, flat_fee);
        }

        Ok(table)
    }

    /// Staff upsert of a country per-kg rate. Country "*" sets the
    /// generic fallback.
    pub async fn upsert_country_rate(
        &self,
        country: &str,
        per_kg: Decimal,
    ) -> SettlementResult<()> {
        if per_kg < Decimal::ZERO {
            return Err(SettlementError::Validation(
                "Rate must not be negative".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO shipping_country_rates (country, per_kg)
            VALUES ($1, $2)
            ON CONFLICT (country) DO UPDATE SET per_kg = EXCLUDED.per_kg
            "#,
        )
        .bind(country)
        .bind(per_kg)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Staff upsert of a method flat rate. COLLECT is pinned to zero and
    /// not editable.
    pub async fn upsert_method_rate(
        &self,
        method: ShippingMethod,
        flat_fee: i64,
    ) -> SettlementResult<()> {
        if method == ShippingMethod::Collect {
            return Err(SettlementError::Validation(
                "COLLECT has no flat rate; the recipient pays the carrier".to_string(),
            ));
        }
        if flat_fee < 0 {
            return Err(SettlementError::Validation(
                "Rate must not be negative".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO shipping_method_rates (method, flat_fee)
            VALUES ($1, $2)
            ON CONFLICT (method) DO UPDATE SET flat_fee = EXCLUDED.flat_fee
            "#,
        )
        .bind(method)
        .bind(flat_fee)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn table() -> RateTable {
        let mut t = RateTable::default();
        t.per_kg_by_country.insert("TW".to_string(), dec!(120));
        t.per_kg_by_country.insert("JP".to_string(), dec!(95.5));
        t.generic_per_kg = Some(dec!(150));
        t.flat_by_method
            .insert(ShippingMethod::HomeDelivery, 130);
        t.flat_by_method.insert(ShippingMethod::PostOffice, 80);
        t.flat_by_method.insert(ShippingMethod::StorePickup, 60);
        t
    }

    #[test]
    fn intl_fee_is_ceiled_weight_times_country_rate() {
        let q = quote(dec!(2.3), "TW", ShippingMethod::HomeDelivery, &table()).unwrap();
        // 2.3 * 120 = 276, already integral
        assert_eq!(q.intl_fee, 276);

        let q = quote(dec!(1.01), "JP", ShippingMethod::PostOffice, &table()).unwrap();
        // 1.01 * 95.5 = 96.455 -> 97
        assert_eq!(q.intl_fee, 97);
    }

    #[test]
    fn unknown_country_falls_back_to_generic_rate() {
        let q = quote(dec!(2), "US", ShippingMethod::PostOffice, &table()).unwrap();
        assert_eq!(q.intl_fee, 300);
    }

    #[test]
    fn no_rate_at_all_means_zero() {
        let mut t = table();
        t.generic_per_kg = None;
        let q = quote(dec!(2), "US", ShippingMethod::PostOffice, &t).unwrap();
        assert_eq!(q.intl_fee, 0);
    }

    #[test]
    fn domestic_fee_is_flat_per_method() {
        let t = table();
        let home = quote(dec!(1), "TW", ShippingMethod::HomeDelivery, &t).unwrap();
        let post = quote(dec!(1), "TW", ShippingMethod::PostOffice, &t).unwrap();
        assert_eq!(home.domestic_fee, 130);
        assert_eq!(post.domestic_fee, 80);
    }

    #[test]
    fn collect_is_always_free_domestically() {
        let mut t = table();
        // Even a stray table row must not charge COLLECT
        t.flat_by_method.insert(ShippingMethod::Collect, 999);
        let q = quote(dec!(5), "TW", ShippingMethod::Collect, &t).unwrap();
        assert_eq!(q.domestic_fee, 0);
    }

    #[test]
    fn quoting_is_deterministic() {
        let t = table();
        let a = quote(dec!(3.7), "JP", ShippingMethod::StorePickup, &t).unwrap();
        let b = quote(dec!(3.7), "JP", ShippingMethod::StorePickup, &t).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn negative_weight_is_rejected() {
        assert!(quote(dec!(-1), "TW", ShippingMethod::PostOffice, &table()).is_err());
    }
}
