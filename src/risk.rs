// ===============================
// src/risk.rs
// ===============================
//
// Pre-trade admission checks plus net-position tracking. `validate` never
// mutates position; position moves only on fills reported by the stream.
//

use thiserror::Error;
use tracing::warn;

use crate::config::RiskLimits;
use crate::domain::{Order, Side};

/// Float slack when checking a post-fill position against its bounds.
const POSITION_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum RiskError {
    #[error("long limit exceeded: {new_position:.4}/{max_long:.4}")]
    LongLimit { new_position: f64, max_long: f64 },
    #[error("short limit exceeded: {new_position:.4}/{max_short:.4}")]
    ShortLimit { new_position: f64, max_short: f64 },
    #[error("order size {quantity:.4} exceeds limit {max_order_size:.4}")]
    OrderSize { quantity: f64, max_order_size: f64 },
}

#[derive(Debug)]
pub struct RiskManager {
    limits: RiskLimits,
    position: f64,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits, position: 0.0 }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Admission check for a prospective order. Pure with respect to
    /// position: acceptance reserves nothing.
    pub fn validate(&self, order: &Order) -> Result<(), RiskError> {
        let delta = match order.side {
            Side::Buy => order.quantity,
            Side::Sell => -order.quantity,
        };
        let new_position = self.position + delta;

        if new_position > self.limits.max_long {
            return Err(RiskError::LongLimit { new_position, max_long: self.limits.max_long });
        }
        if new_position < self.limits.max_short {
            return Err(RiskError::ShortLimit { new_position, max_short: self.limits.max_short });
        }
        if order.quantity > self.limits.max_order_size {
            return Err(RiskError::OrderSize {
                quantity: order.quantity,
                max_order_size: self.limits.max_order_size,
            });
        }
        Ok(())
    }

    /// Apply a confirmed fill from the stream. A maker sell reduces the
    /// position, anything else increases it. Returns the new position.
    pub fn update_position(&mut self, fill_qty: f64, is_maker_sell: bool) -> f64 {
        self.position += if is_maker_sell { -fill_qty } else { fill_qty };
        if self.breached() {
            warn!(
                position = self.position,
                max_long = self.limits.max_long,
                max_short = self.limits.max_short,
                "position outside configured bounds"
            );
        }
        self.position
    }

    /// True while the position sits outside `[max_short, max_long]` beyond
    /// tolerance. The owner halts new placements while this holds.
    pub fn breached(&self) -> bool {
        self.position > self.limits.max_long + POSITION_TOLERANCE
            || self.position < self.limits.max_short - POSITION_TOLERANCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderStatus, Px};

    fn limits() -> RiskLimits {
        RiskLimits { max_long: 50.0, max_short: -50.0, max_order_size: 10.0 }
    }

    fn order(side: Side, quantity: f64) -> Order {
        Order {
            id: "CL-1-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side,
            price: Px(1000),
            quantity,
            status: OrderStatus::Pending,
            filled_quantity: 0.0,
            creation_time_ms: 0,
        }
    }

    #[test]
    fn oversized_order_is_rejected() {
        let risk = RiskManager::new(limits());
        let err = risk.validate(&order(Side::Buy, 15.0)).unwrap_err();
        assert_eq!(err, RiskError::OrderSize { quantity: 15.0, max_order_size: 10.0 });
        // validation never moved the position
        assert_eq!(risk.position(), 0.0);
    }

    #[test]
    fn long_and_short_bounds_are_enforced() {
        let mut risk = RiskManager::new(limits());
        for _ in 0..5 {
            risk.update_position(9.0, false); // buys
        }
        assert_eq!(risk.position(), 45.0);
        assert!(risk.validate(&order(Side::Buy, 6.0)).is_err());
        assert!(risk.validate(&order(Side::Buy, 5.0)).is_ok());
        assert!(risk.validate(&order(Side::Sell, 10.0)).is_ok());

        let mut risk = RiskManager::new(limits());
        risk.update_position(45.0, true); // maker sell -> short
        assert_eq!(risk.position(), -45.0);
        assert!(risk.validate(&order(Side::Sell, 6.0)).is_err());
        assert!(risk.validate(&order(Side::Sell, 5.0)).is_ok());
    }

    #[test]
    fn acceptance_leaves_position_untouched() {
        let risk = RiskManager::new(limits());
        assert!(risk.validate(&order(Side::Buy, 5.0)).is_ok());
        assert_eq!(risk.position(), 0.0);
    }

    #[test]
    fn breach_flag_tracks_bounds() {
        let mut risk = RiskManager::new(limits());
        risk.update_position(49.0, false);
        assert!(!risk.breached());
        risk.update_position(2.0, false); // 51, over the long bound
        assert!(risk.breached());
        risk.update_position(2.0, true); // back to 49
        assert!(!risk.breached());
    }
}
