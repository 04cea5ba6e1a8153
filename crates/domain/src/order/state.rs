//! Order status state machine.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The fulfilment status of an order.
///
/// State transitions:
/// ```text
/// Pending ──► Paid ──► Shipped ──► Delivered
///    │         │
///    └─────────┴──► Cancelled
///
/// PaymentFailed (terminal, never entered by an operator)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created but not yet paid.
    #[default]
    Pending,

    /// Payment captured; checkout creates orders directly in this state.
    Paid,

    /// Handed to the carrier.
    Shipped,

    /// Received by the customer (terminal state).
    Delivered,

    /// Cancelled before shipment (terminal state).
    Cancelled,

    /// Payment could not be captured (terminal state).
    PaymentFailed,
}

impl OrderStatus {
    /// Returns the statuses reachable from this one.
    pub fn allowed_transitions(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Paid, OrderStatus::Cancelled],
            OrderStatus::Paid => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::PaymentFailed => &[],
        }
    }

    /// Returns true if `to` is reachable from this status.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Validates a transition, returning an error if it is not in the table.
    pub fn transition_to(&self, to: OrderStatus) -> Result<OrderStatus, DomainError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(DomainError::InvalidTransition { from: *self, to })
        }
    }

    /// Returns true if moving from this status to `to` puts the order's
    /// quantities back into stock.
    ///
    /// Only cancellation of an order whose goods never left the warehouse
    /// restores stock.
    pub fn restores_stock_on(&self, to: OrderStatus) -> bool {
        to == OrderStatus::Cancelled && matches!(self, OrderStatus::Pending | OrderStatus::Paid)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Parses a status an operator asked for.
    ///
    /// `payment_failed` is only ever set by the payment path and is rejected here.
    pub fn parse_operator_target(s: &str) -> Result<OrderStatus, DomainError> {
        match s.parse::<OrderStatus>()? {
            OrderStatus::PaymentFailed => Err(DomainError::InvalidStatus {
                status: s.to_string(),
            }),
            status => Ok(status),
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::PaymentFailed => "payment_failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "payment_failed" => Ok(OrderStatus::PaymentFailed),
            other => Err(DomainError::InvalidStatus {
                status: other.to_string(),
            }),
        }
    }
}

/// Settlement state of the order's payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(DomainError::InvalidStatus {
                status: other.to_string(),
            }),
        }
    }
}
