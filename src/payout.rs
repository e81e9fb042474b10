//! Commission / payout split.
//!
//! Integer arithmetic only. Amounts are in minor units (cents).

/// Default platform commission in whole percent.
pub const DEFAULT_COMMISSION_PERCENT: u8 = 10;

/// Split an escrow amount into (commission, payout).
///
/// `commission = floor(amount * percent / 100)`, payout is the remainder,
/// so `commission + payout == amount` for every input.
///
/// Uses u128 intermediate to prevent overflow.
///
/// # Example
/// ```
/// use escrow_core::payout::calculate_commission;
/// let (commission, payout) = calculate_commission(10_000, 10);
/// assert_eq!(commission, 1_000);
/// assert_eq!(payout, 9_000);
/// ```
#[inline]
pub fn calculate_commission(amount_minor: u64, commission_percent: u8) -> (u64, u64) {
    debug_assert!(commission_percent <= 100);
    let commission = (amount_minor as u128 * commission_percent as u128 / 100) as u64;
    (commission, amount_minor - commission)
}
