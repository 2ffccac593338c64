/// Tunable business constants, read once at startup.
///
/// All amounts are in the smallest currency unit.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Minimum balance to upgrade guest -> retail
    pub retail_min: i64,
    /// Minimum balance (beyond the fee) to upgrade retail -> wholesale
    pub wholesale_min: i64,
    /// One-time fee debited on the wholesale upgrade
    pub agency_fee: i64,
    /// Minimum qualifying spend over the sweep window
    pub sweep_min_spend: i64,
    /// Trailing window, in days, the sweep sums orders over
    pub sweep_window_days: i64,
    /// Accounts younger than this are exempt from the sweep
    pub account_age_days: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            retail_min: 1500,
            wholesale_min: 5000,
            agency_fee: 6000,
            sweep_min_spend: 300,
            sweep_window_days: 45,
            account_age_days: 45,
        }
    }
}

impl PolicyConfig {
    /// Load from environment, falling back to the defaults above.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retail_min: env_i64("POLICY_RETAIL_MIN", defaults.retail_min),
            wholesale_min: env_i64("POLICY_WHOLESALE_MIN", defaults.wholesale_min),
            agency_fee: env_i64("POLICY_AGENCY_FEE", defaults.agency_fee),
            sweep_min_spend: env_i64("POLICY_SWEEP_MIN_SPEND", defaults.sweep_min_spend),
            sweep_window_days: env_i64("POLICY_SWEEP_WINDOW_DAYS", defaults.sweep_window_days),
            account_age_days: env_i64("POLICY_ACCOUNT_AGE_DAYS", defaults.account_age_days),
        }
    }

    /// Total balance required for the wholesale upgrade.
    pub fn wholesale_required(&self) -> i64 {
        self.wholesale_min + self.agency_fee
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let cfg = PolicyConfig::default();
        assert_eq!(cfg.retail_min, 1500);
        assert_eq!(cfg.wholesale_required(), 11000);
        assert_eq!(cfg.sweep_min_spend, 300);
        assert_eq!(cfg.sweep_window_days, 45);
    }
}
