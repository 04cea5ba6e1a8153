use common::UserId;
use domain::{OrderStatus, OrderSummary};
use serde::Serialize;

/// Operator listing filter for orders.
///
/// Paging values are clamped by [`OrderQuery::normalized`]: `page >= 1`,
/// `1 <= limit <= 100`.
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    /// Only orders in this status.
    pub status: Option<OrderStatus>,

    /// Only orders placed by this user.
    pub user_id: Option<UserId>,

    /// 1-based page number.
    pub page: Option<u32>,

    /// Page size.
    pub limit: Option<u32>,
}

impl OrderQuery {
    /// Default page size.
    pub const DEFAULT_LIMIT: u32 = 20;

    /// Largest accepted page size.
    pub const MAX_LIMIT: u32 = 100;

    /// Creates an empty query (all orders, first page).
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by status.
    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filters by user.
    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Selects a page.
    pub fn page(mut self, page: u32, limit: u32) -> Self {
        self.page = Some(page);
        self.limit = Some(limit);
        self
    }

    /// Returns `(page, limit)` with defaults applied and bounds enforced.
    pub fn normalized(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self
            .limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT);
        (page, limit)
    }

    /// Returns the number of rows to skip.
    pub fn offset(&self) -> u64 {
        let (page, limit) = self.normalized();
        u64::from(page - 1) * u64::from(limit)
    }

    /// Returns true if the summary satisfies the filters.
    pub fn matches(&self, summary: &OrderSummary) -> bool {
        if let Some(status) = self.status
            && summary.status != status
        {
            return false;
        }
        if let Some(user_id) = self.user_id
            && summary.user_id != user_id
        {
            return false;
        }
        true
    }
}

/// One page of an order listing.
#[derive(Debug, Clone, Serialize)]
pub struct OrderPage {
    pub total: u64,
    pub items: Vec<OrderSummary>,
    pub page: u32,
    pub limit: u32,
}
