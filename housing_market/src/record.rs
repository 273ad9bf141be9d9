use crate::{DwellingId, HouseholdId, OfferId};

/// A willingness-to-pay submitted for the current month.
///
/// Bids live only until the end of the clear they were submitted to; anything
/// still unmatched then has to be submitted again next month.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bid {
    pub bidder: HouseholdId,
    pub max_price: f64,
    /// Buy-to-let bid, ranked by yield instead of quality
    pub investor: bool,
    /// Cash the bidder can put down, checked against the BTL minimum down payment
    pub liquid_reserves: f64,
}

impl Bid {
    pub fn owner_occupier(bidder: HouseholdId, max_price: f64) -> Self {
        Bid {
            bidder,
            max_price,
            investor: false,
            liquid_reserves: 0.0,
        }
    }

    pub fn investor(bidder: HouseholdId, max_price: f64, liquid_reserves: f64) -> Self {
        Bid {
            bidder,
            max_price,
            investor: true,
            liquid_reserves,
        }
    }
}

/// A dwelling listed on one market.
///
/// The price is only changed by the market that owns the record, and only
/// while the record is out of every queue.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferRecord {
    id: OfferId,
    dwelling: DwellingId,
    quality: usize,
    price: f64,
    listed_at: usize,
    investor_offer: bool,
    pub(crate) matched_bids: Vec<Bid>,
}

impl OfferRecord {
    pub fn new(
        id: OfferId,
        dwelling: DwellingId,
        quality: usize,
        price: f64,
        listed_at: usize,
        investor_offer: bool,
    ) -> Self {
        OfferRecord {
            id,
            dwelling,
            quality,
            price,
            listed_at,
            investor_offer,
            matched_bids: Vec::new(),
        }
    }

    pub fn id(&self) -> OfferId {
        self.id
    }

    pub fn dwelling(&self) -> DwellingId {
        self.dwelling
    }

    pub fn quality(&self) -> usize {
        self.quality
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    /// Month the dwelling was first listed; unchanged by repricing
    pub fn listed_at(&self) -> usize {
        self.listed_at
    }

    pub fn is_investor_offer(&self) -> bool {
        self.investor_offer
    }

    pub fn matched_bids(&self) -> &[Bid] {
        &self.matched_bids
    }

    pub(crate) fn set_price(&mut self, price: f64) {
        self.price = price;
    }

    pub fn months_on_market(&self, month: usize) -> usize {
        month.saturating_sub(self.listed_at)
    }
}
