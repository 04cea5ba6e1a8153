//! Totals calculator.
//!
//! `subtotal = Σ unit_price × quantity`, tax and shipping come from
//! pluggable policies, and `total = subtotal + tax + shipping`. All arithmetic
//! is integer cents; any overflow is reported instead of wrapping.

use std::sync::Arc;

use serde::Serialize;

use crate::error::DomainError;
use crate::order::Money;

/// Computes a surcharge (tax, shipping) from an order subtotal.
pub trait ChargePolicy: Send + Sync {
    fn charge(&self, subtotal: Money) -> Money;
}

/// Policy that never charges anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCharge;

impl ChargePolicy for NoCharge {
    fn charge(&self, _subtotal: Money) -> Money {
        Money::zero()
    }
}

impl<F> ChargePolicy for F
where
    F: Fn(Money) -> Money + Send + Sync,
{
    fn charge(&self, subtotal: Money) -> Money {
        self(subtotal)
    }
}

/// Monetary breakdown of an order.
///
/// Can only be built through [`Totals::new`] or [`Totals::from_parts`], so
/// `total == subtotal + tax + shipping` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    subtotal: Money,
    tax: Money,
    shipping: Money,
    total: Money,
}

impl Totals {
    /// Builds totals from their components.
    pub fn new(subtotal: Money, tax: Money, shipping: Money) -> Result<Self, DomainError> {
        let total = subtotal.checked_add(tax)?.checked_add(shipping)?;
        Ok(Self {
            subtotal,
            tax,
            shipping,
            total,
        })
    }

    /// Rebuilds totals read back from storage, checking the stored total.
    pub fn from_parts(
        subtotal: Money,
        tax: Money,
        shipping: Money,
        total: Money,
    ) -> Result<Self, DomainError> {
        let totals = Self::new(subtotal, tax, shipping)?;
        if totals.total != total {
            return Err(DomainError::InconsistentTotals);
        }
        Ok(totals)
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn tax(&self) -> Money {
        self.tax
    }

    pub fn shipping(&self) -> Money {
        self.shipping
    }

    pub fn total(&self) -> Money {
        self.total
    }
}

/// Pure function object from priced lines to [`Totals`].
#[derive(Clone)]
pub struct TotalsCalculator {
    tax: Arc<dyn ChargePolicy>,
    shipping: Arc<dyn ChargePolicy>,
}

impl TotalsCalculator {
    /// Creates a calculator with the given tax and shipping policies.
    pub fn new(tax: impl ChargePolicy + 'static, shipping: impl ChargePolicy + 'static) -> Self {
        Self {
            tax: Arc::new(tax),
            shipping: Arc::new(shipping),
        }
    }

    /// Computes totals for `(unit_price, quantity)` lines.
    pub fn compute<I>(&self, lines: I) -> Result<Totals, DomainError>
    where
        I: IntoIterator<Item = (Money, u32)>,
    {
        let subtotal = lines
            .into_iter()
            .try_fold(Money::zero(), |acc, (unit_price, quantity)| {
                acc.checked_add(unit_price.checked_multiply(quantity)?)
            })?;
        let tax = self.tax.charge(subtotal);
        let shipping = self.shipping.charge(subtotal);
        Totals::new(subtotal, tax, shipping)
    }
}

impl Default for TotalsCalculator {
    fn default() -> Self {
        Self::new(NoCharge, NoCharge)
    }
}

impl std::fmt::Debug for TotalsCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotalsCalculator").finish_non_exhaustive()
    }
}
