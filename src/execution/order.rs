//! Order intents and bracket construction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Direction, Price};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

/// What an order is for within a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderRole {
    Entry,
    ProtectiveStop,
    Target,
    Exit,
}

/// Order request handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Client-side order id
    pub id: Uuid,
    pub role: OrderRole,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Limit price (limit orders)
    pub limit_price: Option<Price>,
    /// Trigger price (stop orders)
    pub stop_price: Option<Price>,
    pub quantity: u32,
    /// Time of the bar that produced the intent
    pub created_at: DateTime<Utc>,
}

impl OrderIntent {
    /// Create a market order
    pub fn market(role: OrderRole, side: OrderSide, quantity: u32, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            side,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            quantity,
            created_at: at,
        }
    }

    /// Create a limit order
    pub fn limit(
        role: OrderRole,
        side: OrderSide,
        quantity: u32,
        limit_price: Price,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            side,
            order_type: OrderType::Limit,
            limit_price: Some(limit_price),
            stop_price: None,
            quantity,
            created_at: at,
        }
    }

    /// Create a stop order
    pub fn stop(
        role: OrderRole,
        side: OrderSide,
        quantity: u32,
        stop_price: Price,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            side,
            order_type: OrderType::Stop,
            limit_price: None,
            stop_price: Some(stop_price),
            quantity,
            created_at: at,
        }
    }

    /// Price the order rests at, whichever kind it is
    pub fn working_price(&self) -> Option<Price> {
        self.limit_price.or(self.stop_price)
    }
}

/// Linked entry + protective stop + target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketOrder {
    pub direction: Direction,
    pub entry: OrderIntent,
    pub stop_loss: OrderIntent,
    pub take_profit: OrderIntent,
}

impl BracketOrder {
    /// Entry limit at `entry_price`, stop and target on the opposite side
    pub fn new(
        direction: Direction,
        quantity: u32,
        entry_price: Price,
        stop_price: Price,
        target_price: Price,
        at: DateTime<Utc>,
    ) -> Self {
        let side = direction.entry_side();
        Self {
            direction,
            entry: OrderIntent::limit(OrderRole::Entry, side, quantity, entry_price, at),
            stop_loss: OrderIntent::stop(
                OrderRole::ProtectiveStop,
                side.opposite(),
                quantity,
                stop_price,
                at,
            ),
            take_profit: OrderIntent::limit(
                OrderRole::Target,
                side.opposite(),
                quantity,
                target_price,
                at,
            ),
        }
    }

    /// Intents in submission order: entry, stop, target
    pub fn intents(&self) -> [&OrderIntent; 3] {
        [&self.entry, &self.stop_loss, &self.take_profit]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_bracket_long() {
        let at = Utc::now();
        let bracket = BracketOrder::new(Direction::Long, 1, dec!(21505), dec!(21498.5), dec!(21535), at);

        assert_eq!(bracket.entry.side, OrderSide::Buy);
        assert_eq!(bracket.entry.order_type, OrderType::Limit);
        assert_eq!(bracket.entry.limit_price, Some(dec!(21505)));

        assert_eq!(bracket.stop_loss.side, OrderSide::Sell);
        assert_eq!(bracket.stop_loss.order_type, OrderType::Stop);
        assert_eq!(bracket.stop_loss.stop_price, Some(dec!(21498.5)));

        assert_eq!(bracket.take_profit.side, OrderSide::Sell);
        assert_eq!(bracket.take_profit.limit_price, Some(dec!(21535)));
    }

    #[test]
    fn test_bracket_short_order_sequence() {
        let bracket = BracketOrder::new(Direction::Short, 2, dec!(100), dec!(102), dec!(96), Utc::now());
        let roles: Vec<_> = bracket.intents().iter().map(|o| o.role).collect();
        assert_eq!(roles, vec![OrderRole::Entry, OrderRole::ProtectiveStop, OrderRole::Target]);
        assert!(bracket.intents().iter().all(|o| o.quantity == 2));
        assert_eq!(bracket.entry.side, OrderSide::Sell);
        assert_eq!(bracket.stop_loss.side, OrderSide::Buy);
        assert_eq!(bracket.stop_loss.working_price(), Some(dec!(102)));
    }
}
