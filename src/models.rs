use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account balance - the denormalized current balance for one user
///
/// Key design decisions:
/// - `balance` is i64 in the smallest currency unit (never fractional,
///   never floating point)
/// - Invariant: balance == signed sum of the user's ledger entries
/// - Written only by the ledger store, in the same transaction as the
///   ledger row it mirrors
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccountBalance {
    pub user_id: String,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ledger entry - immutable audit trail of every monetary movement
///
/// Entries are append-only at the schema level (trigger rejects
/// UPDATE/DELETE). The sign of the movement is implied by `entry_type`;
/// `amount` is always positive.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    pub entry_type: EntryType,
    pub amount: i64,
    pub charge_type: Option<ChargeType>,
    pub external_ref: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What kind of monetary movement a ledger entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// Money added to the wallet (manual or gateway top-up)
    Topup,
    /// Funds frozen against a new order
    Hold,
    /// Funds permanently spent (shipping fees, final charges)
    Payment,
    /// Funds credited back (cancellation, shortage refund)
    Refund,
    /// Administrative debit (agency fee on tier upgrade)
    Debit,
}

impl EntryType {
    /// Credits increase the balance, debits decrease it.
    pub fn is_credit(self) -> bool {
        matches!(self, EntryType::Topup | EntryType::Refund)
    }

    /// The signed delta this entry applies to the balance.
    pub fn signed_amount(self, amount: i64) -> i64 {
        if self.is_credit() {
            amount
        } else {
            -amount
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryType::Topup => "TOPUP",
            EntryType::Hold => "HOLD",
            EntryType::Payment => "PAYMENT",
            EntryType::Refund => "REFUND",
            EntryType::Debit => "DEBIT",
        };
        write!(f, "{}", s)
    }
}

/// What a debiting entry was charged for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeType {
    Product,
    Shipping,
}

impl std::fmt::Display for ChargeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChargeType::Product => write!(f, "PRODUCT"),
            ChargeType::Shipping => write!(f, "SHIPPING"),
        }
    }
}

/// Wallet hold - funds earmarked against one order
///
/// Invariant enforced on every transition:
/// `amount_converted + amount_released <= amount_total`
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WalletHold {
    pub id: String,
    pub user_id: String,
    pub order_id: Option<String>,
    pub state: HoldState,
    pub amount_total: i64,
    pub amount_converted: i64,
    pub amount_released: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletHold {
    /// Funds still frozen, neither spent nor returned.
    pub fn outstanding(&self) -> i64 {
        self.amount_total - self.amount_converted - self.amount_released
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldState {
    Frozen,
    Released,
    Converted,
}

impl std::fmt::Display for HoldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HoldState::Frozen => write!(f, "FROZEN"),
            HoldState::Released => write!(f, "RELEASED"),
            HoldState::Converted => write!(f, "CONVERTED"),
        }
    }
}

/// Order status - the fulfillment state machine
///
/// Happy path: PENDING → PICKING → CHARGED → ARRIVED_TW → READY_TO_SHIP
/// → SHIPPED → RECEIVED. REFUNDED and CANCELLED absorb from most
/// non-terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Picking,
    Charged,
    ArrivedTw,
    ReadyToShip,
    Shipped,
    Received,
    Refunded,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Received | OrderStatus::Refunded | OrderStatus::Cancelled
        )
    }

    /// The single forward step along the happy path, if any.
    pub fn next(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::Picking),
            OrderStatus::Picking => Some(OrderStatus::Charged),
            OrderStatus::Charged => Some(OrderStatus::ArrivedTw),
            OrderStatus::ArrivedTw => Some(OrderStatus::ReadyToShip),
            OrderStatus::ReadyToShip => Some(OrderStatus::Shipped),
            OrderStatus::Shipped => Some(OrderStatus::Received),
            _ => None,
        }
    }

    /// Whether the fulfillment flow may move from `self` to `to`.
    ///
    /// Cancellation is only allowed before the parcel enters the outbound
    /// pipeline; REFUNDED is reached through the refund workflow when every
    /// line ends OUT_OF_STOCK, from any non-terminal state.
    pub fn can_transition(self, to: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            OrderStatus::Cancelled => matches!(
                self,
                OrderStatus::Pending
                    | OrderStatus::Picking
                    | OrderStatus::Charged
                    | OrderStatus::ArrivedTw
            ),
            OrderStatus::Refunded => true,
            _ => self.next() == Some(to),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Picking => "PICKING",
            OrderStatus::Charged => "CHARGED",
            OrderStatus::ArrivedTw => "ARRIVED_TW",
            OrderStatus::ReadyToShip => "READY_TO_SHIP",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Received => "RECEIVED",
            OrderStatus::Refunded => "REFUNDED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Order - created atomically with its lines and its hold
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub status: OrderStatus,
    pub total: i64,
    pub hold_id: String,
    pub external_ref: Option<String>,
    pub shipping_fee_intl: i64,
    pub box_fee: i64,
    pub shipping_paid: bool,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub recipient_address: String,
    pub country: String,
    pub shipping_method: Option<ShippingMethod>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// International shipping still owed before the order may advance
    /// past ARRIVED_TW.
    pub fn shipping_outstanding(&self) -> i64 {
        if self.shipping_paid {
            0
        } else {
            self.shipping_fee_intl + self.box_fee
        }
    }
}

/// Order line status
///
/// NORMAL → ALLOCATED → IN_TRANSIT → ARRIVED → SHIPPED → RECEIVED;
/// OUT_OF_STOCK / PARTIAL_OOS mark shortage refunds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineStatus {
    Normal,
    Allocated,
    InTransit,
    Arrived,
    Shipped,
    Received,
    OutOfStock,
    PartialOos,
}

impl LineStatus {
    /// Recompute a line's status after its cumulative refund changed.
    /// A fully refunded line is OUT_OF_STOCK, a partially refunded one
    /// PARTIAL_OOS; otherwise the current status stands.
    pub fn after_refund(self, refund_amount: i64, line_total: i64) -> LineStatus {
        if refund_amount >= line_total {
            LineStatus::OutOfStock
        } else if refund_amount > 0 {
            LineStatus::PartialOos
        } else {
            self
        }
    }
}

impl std::fmt::Display for LineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LineStatus::Normal => "NORMAL",
            LineStatus::Allocated => "ALLOCATED",
            LineStatus::InTransit => "IN_TRANSIT",
            LineStatus::Arrived => "ARRIVED",
            LineStatus::Shipped => "SHIPPED",
            LineStatus::Received => "RECEIVED",
            LineStatus::OutOfStock => "OUT_OF_STOCK",
            LineStatus::PartialOos => "PARTIAL_OOS",
        };
        write!(f, "{}", s)
    }
}

/// Order line
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub qty: i32,
    pub unit_price: i64,
    pub status: LineStatus,
    pub refund_amount: i64,
    pub weight_kg: Option<Decimal>,
    pub shipping_fee_intl: i64,
    pub shipping_fee_domestic: i64,
    pub shipping_paid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderLine {
    pub fn line_total(&self) -> i64 {
        self.unit_price * self.qty as i64
    }
}

/// Domestic shipping method. COLLECT is the carrier where the recipient
/// settles the cost directly, so its flat rate is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingMethod {
    HomeDelivery,
    PostOffice,
    StorePickup,
    Collect,
}

impl std::fmt::Display for ShippingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ShippingMethod::HomeDelivery => "HOME_DELIVERY",
            ShippingMethod::PostOffice => "POST_OFFICE",
            ShippingMethod::StorePickup => "STORE_PICKUP",
            ShippingMethod::Collect => "COLLECT",
        };
        write!(f, "{}", s)
    }
}

/// Membership tier, strictly ordered: guest < retail < wholesale < vip.
/// VIP is assigned out-of-band, never via self-service upgrade.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Guest,
    Retail,
    Wholesale,
    Vip,
}

impl Tier {
    /// Whether this tier buys at wholesale prices.
    pub fn wholesale_pricing(self) -> bool {
        self >= Tier::Wholesale
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Guest => "guest",
            Tier::Retail => "retail",
            Tier::Wholesale => "wholesale",
            Tier::Vip => "vip",
        };
        write!(f, "{}", s)
    }
}

/// Membership profile - tier and login-gating state for one user
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub tier: Tier,
    pub login_enabled: bool,
    pub login_disabled_at: Option<DateTime<Utc>>,
    pub login_disabled_reason: Option<String>,
    pub last_purchase_date: Option<NaiveDate>,
    pub tier_upgraded_at: Option<DateTime<Utc>>,
    pub tier_upgraded_from: Option<Tier>,
    pub registered_at: DateTime<Utc>,
}

/// Catalog product as seen by the settlement core (read-only)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub status: ProductStatus,
    pub moq: i32,
    pub wholesale_price: Option<i64>,
    pub retail_price: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus {
    Published,
    Unpublished,
}

// === API Request/Response Models ===

/// Staff top-up of a user's wallet
#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub user_id: String,
    pub amount: i64,
    pub external_ref: String,
    pub note: Option<String>,
}

/// One requested line in a new order
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrderLine {
    pub product_id: String,
    pub qty: i32,
}

/// Request to create an order
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub external_ref: String,
    pub lines: Vec<NewOrderLine>,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub recipient_address: String,
    pub country: String,
    pub shipping_method: Option<ShippingMethod>,
}

/// Staff request to advance an order along the fulfillment path
#[derive(Debug, Deserialize)]
pub struct AdvanceStatusRequest {
    pub status: OrderStatus,
}

/// Pay the order-level international shipping + box fee
#[derive(Debug, Deserialize)]
pub struct PayShippingRequest {
    pub external_ref: String,
}

/// Pay shipping for a subset of lines
#[derive(Debug, Deserialize)]
pub struct PayLineShippingRequest {
    pub line_ids: Vec<String>,
    pub external_ref: String,
}

/// One line of a shortage refund
#[derive(Debug, Clone, Deserialize)]
pub struct RefundItem {
    pub line_id: String,
    pub refund_qty: i32,
}

/// Staff request to refund shortage quantities
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub external_ref: String,
    pub items: Vec<RefundItem>,
}

/// Staff edit of the order-level fees settled at ARRIVED_TW
#[derive(Debug, Deserialize)]
pub struct OrderShippingRequest {
    pub shipping_fee_intl: i64,
    pub box_fee: i64,
}

/// Staff edit of a line's shipping inputs; fees are recomputed from the
/// rate table, so repeating the call with the same inputs is a no-op.
#[derive(Debug, Deserialize)]
pub struct LineShippingRequest {
    pub weight_kg: Decimal,
    pub country: String,
    pub method: ShippingMethod,
}

/// Self-service tier upgrade request
#[derive(Debug, Deserialize)]
pub struct UpgradeRequest {
    pub target: Tier,
}

/// Staff upsert of a country per-kg rate or a method flat rate
#[derive(Debug, Deserialize)]
pub struct RateUpsertRequest {
    pub country: Option<String>,
    pub method: Option<ShippingMethod>,
    pub per_kg: Option<Decimal>,
    pub flat_fee: Option<i64>,
}

/// Generic API response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}

/// Wallet view: balance plus recent ledger history
#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub user_id: String,
    pub balance: i64,
    pub entries: Vec<LedgerEntry>,
}

/// Order plus its lines
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order: Order,
    pub lines: Vec<OrderLine>,
}

/// Tier upgrade outcome
#[derive(Debug, Serialize)]
pub struct UpgradeResponse {
    pub user_id: String,
    pub tier: Tier,
    pub upgraded_from: Tier,
    pub fee_debited: i64,
    pub balance: i64,
}

/// One account the sweep disabled
#[derive(Debug, Clone, Serialize)]
pub struct SweepDisabled {
    pub user_id: String,
    pub reason: String,
}

/// Outcome of one maintenance sweep run
#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub evaluated: usize,
    pub disabled: Vec<SweepDisabled>,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_amounts_follow_entry_type() {
        assert_eq!(EntryType::Topup.signed_amount(100), 100);
        assert_eq!(EntryType::Refund.signed_amount(100), 100);
        assert_eq!(EntryType::Hold.signed_amount(100), -100);
        assert_eq!(EntryType::Payment.signed_amount(100), -100);
        assert_eq!(EntryType::Debit.signed_amount(100), -100);
    }

    #[test]
    fn happy_path_transitions_are_single_steps() {
        use OrderStatus::*;
        let path = [
            Pending, Picking, Charged, ArrivedTw, ReadyToShip, Shipped, Received,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        // No skipping ahead
        assert!(!Pending.can_transition(Charged));
        assert!(!ArrivedTw.can_transition(Shipped));
    }

    #[test]
    fn cancellation_window_closes_once_ready_to_ship() {
        use OrderStatus::*;
        assert!(Pending.can_transition(Cancelled));
        assert!(ArrivedTw.can_transition(Cancelled));
        assert!(!ReadyToShip.can_transition(Cancelled));
        assert!(!Shipped.can_transition(Cancelled));
    }

    #[test]
    fn terminal_states_absorb() {
        use OrderStatus::*;
        for terminal in [Received, Refunded, Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition(Pending));
            assert!(!terminal.can_transition(Refunded));
        }
    }

    #[test]
    fn line_status_tracks_cumulative_refund() {
        assert_eq!(LineStatus::Normal.after_refund(0, 300), LineStatus::Normal);
        assert_eq!(
            LineStatus::Normal.after_refund(100, 300),
            LineStatus::PartialOos
        );
        assert_eq!(
            LineStatus::Arrived.after_refund(300, 300),
            LineStatus::OutOfStock
        );
    }

    #[test]
    fn tier_ordering_gates_wholesale_pricing() {
        assert!(Tier::Guest < Tier::Retail);
        assert!(Tier::Retail < Tier::Wholesale);
        assert!(Tier::Wholesale < Tier::Vip);
        assert!(!Tier::Retail.wholesale_pricing());
        assert!(Tier::Wholesale.wholesale_pricing());
        assert!(Tier::Vip.wholesale_pricing());
    }
}
