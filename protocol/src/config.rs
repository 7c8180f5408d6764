//! # Protocol Configuration & Constants
//!
//! Every magic number in Heirloom lives here. The inactivity delay in
//! particular is the single most consequential constant in the system:
//! it decides when someone else gets to walk off with the money.

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full protocol version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Inheritance
// ---------------------------------------------------------------------------

/// Inactivity delay in seconds: 30 days.
///
/// The heir may claim once `now - last_activity >= INACTIVITY_DELAY_SECS`.
/// The comparison is inclusive. Exactly 30 days is enough.
pub const INACTIVITY_DELAY_SECS: i64 = 30 * 24 * 60 * 60;

/// Returns the inactivity delay as a `chrono::Duration` for timestamp math.
pub fn inactivity_delay() -> chrono::Duration {
    chrono::Duration::seconds(INACTIVITY_DELAY_SECS)
}

// ---------------------------------------------------------------------------
// Native Asset
// ---------------------------------------------------------------------------

/// Decimal places of the native asset. 18, like ether and wei.
pub const NATIVE_DECIMALS: u32 = 18;

/// Base units per whole coin (`10^NATIVE_DECIMALS`).
pub const UNITS_PER_COIN: u128 = 1_000_000_000_000_000_000;

/// Ticker used when rendering amounts for humans.
pub const NATIVE_SYMBOL: &str = "ETH";

/// Funding attached at deployment when `INHERITANCE_AMOUNT` is not set.
pub const DEFAULT_FUNDING_AMOUNT: &str = "0.001";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Address length in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// Ed25519 secret key length in bytes.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default JSON-RPC / REST port. Same as every local dev chain out there,
/// so existing muscle memory keeps working.
pub const DEFAULT_RPC_PORT: u16 = 8545;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 9545;

/// Network endpoint recorded with a deployment when none is configured.
pub const DEFAULT_NETWORK_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";

/// Number of deterministic unlocked accounts the dev node creates.
pub const DEFAULT_DEV_ACCOUNTS: usize = 4;

/// Allowance credited to each dev account, in whole coins.
pub const DEV_ACCOUNT_ALLOWANCE_COINS: u128 = 10_000;

/// Maximum number of events returned by a single `/events` page.
pub const MAX_EVENTS_PAGE: usize = 500;
