use serde::Serialize;

use crate::market::MarketKind;
use crate::{DwellingId, HouseholdId, OfferId};

/// A committed sale or letting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub kind: MarketKind,
    pub month: usize,
    pub offer: OfferId,
    pub dwelling: DwellingId,
    pub quality: usize,
    /// Buyer on the sale market, tenant on the rental market
    pub buyer: HouseholdId,
    /// Owner at the time of the commit (the landlord for a letting)
    pub seller: Option<HouseholdId>,
    pub price: f64,
    pub list_price: f64,
    pub listed_at: usize,
    pub investor_bid: bool,
    pub investor_offer: bool,
    /// Bids that matched the offer in the round it cleared
    pub competing_bids: usize,
    /// Home the buyer or tenant left to move in
    pub vacated: Option<DwellingId>,
    /// Resident other than the seller who had to leave (evicted tenant)
    pub displaced: Option<HouseholdId>,
}

impl Transaction {
    pub fn months_on_market(&self) -> usize {
        self.month.saturating_sub(self.listed_at)
    }

    /// Sale price relative to the list price.
    pub fn bid_up_ratio(&self) -> f64 {
        if self.list_price > 0.0 {
            self.price / self.list_price
        } else {
            1.0
        }
    }
}

/// Hook invoked by the engine on every commit.
///
/// Household and statistics layers implement this to follow ownership,
/// tenancy and prices; both methods default to doing nothing.
pub trait TransactionListener {
    fn on_sale_completed(&mut self, _sale: &Transaction) {}

    fn on_rental_completed(&mut self, _letting: &Transaction) {}
}

impl TransactionListener for () {}

/// Collects every commit, in order.
impl TransactionListener for Vec<Transaction> {
    fn on_sale_completed(&mut self, sale: &Transaction) {
        self.push(sale.clone());
    }

    fn on_rental_completed(&mut self, letting: &Transaction) {
        self.push(letting.clone());
    }
}

/// Forwards each commit to several listeners in turn.
pub struct Fanout<'a> {
    listeners: Vec<&'a mut dyn TransactionListener>,
}

impl<'a> Fanout<'a> {
    pub fn new(listeners: Vec<&'a mut dyn TransactionListener>) -> Self {
        Fanout { listeners }
    }
}

impl TransactionListener for Fanout<'_> {
    fn on_sale_completed(&mut self, sale: &Transaction) {
        for listener in self.listeners.iter_mut() {
            listener.on_sale_completed(sale);
        }
    }

    fn on_rental_completed(&mut self, letting: &Transaction) {
        for listener in self.listeners.iter_mut() {
            listener.on_rental_completed(letting);
        }
    }
}

/// What one `Market::clear` did.
///
/// Every submitted bid ends up in exactly one bucket:
/// `bids_submitted == unmatched + self_matches + transactions + outbid_discarded + expired`.
/// Re-queued bids are counted on each re-entry in `requeued`, which is why
/// they don't appear in that sum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClearingReport {
    pub kind: MarketKind,
    pub month: usize,
    pub bids_submitted: usize,
    pub offers_listed: usize,
    pub rounds: usize,
    pub round_budget: usize,
    pub transactions: Vec<Transaction>,
    /// No eligible (or affordable) offer in a round
    pub unmatched: usize,
    /// Best offer belonged to the bidder
    pub self_matches: usize,
    /// Outbid but able to pay, sent to the next round
    pub requeued: usize,
    /// Outbid and priced below the sale price, dropped
    pub outbid_discarded: usize,
    /// Still waiting when bids, offers or rounds ran out
    pub expired: usize,
}

impl ClearingReport {
    pub fn new(
        kind: MarketKind,
        month: usize,
        bids_submitted: usize,
        offers_listed: usize,
    ) -> Self {
        ClearingReport {
            kind,
            month,
            bids_submitted,
            offers_listed,
            rounds: 0,
            round_budget: 0,
            transactions: Vec::new(),
            unmatched: 0,
            self_matches: 0,
            requeued: 0,
            outbid_discarded: 0,
            expired: 0,
        }
    }

    pub fn bids_accounted(&self) -> usize {
        self.unmatched
            + self.self_matches
            + self.transactions.len()
            + self.outbid_discarded
            + self.expired
    }

    pub fn offers_remaining(&self) -> usize {
        self.offers_listed - self.transactions.len()
    }

    pub fn average_price(&self) -> Option<f64> {
        if self.transactions.is_empty() {
            return None;
        }
        let total: f64 = self.transactions.iter().map(|t| t.price).sum();
        Some(total / self.transactions.len() as f64)
    }
}
