//! One regional sale or rental market and its monthly clearing.
//!
//! A month goes `Idle -> Collecting -> Clearing -> Idle`: offers and bids are
//! collected, then [`Market::clear`] runs a bounded number of rounds of
//!
//! 1. **match** – every bid is pointed at the best offer under its price
//!    ceiling (quality-ranked for owner-occupiers, yield-ranked and
//!    affordability-checked for investors on a sale market);
//! 2. **resolve** – offers with one matched bid sell at list price, offers
//!    with several go through the bid-up auction and the losers get another
//!    round.
//!
//! Sale and rental markets are the same type; what differs is carried by
//! [`Capabilities`].

use std::collections::BTreeMap;
use std::fmt;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bid_up::{BidUp, select_winner};
use crate::config::MarketConfig;
use crate::dwelling::Dwellings;
use crate::error::MarketError;
use crate::priority_queue::{Dominance, PriorityQueue2D};
use crate::record::{Bid, OfferRecord};
use crate::transaction::{ClearingReport, Transaction, TransactionListener};
use crate::{DwellingId, HouseholdId, OfferId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketKind {
    Sale,
    Rental,
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketKind::Sale => write!(f, "sale"),
            MarketKind::Rental => write!(f, "rental"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketPhase {
    Idle,
    Collecting,
    Clearing,
}

/// Minimum cash down payment a buy-to-let purchase needs to pass the lender's
/// interest-cover stress test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownPaymentRule {
    pub interest_cover_ratio_limit: f64,
    pub stressed_interest_rate: f64,
}

impl DownPaymentRule {
    /// `price * (1 - yield / (icr * stressed_rate))`, never below zero
    pub fn min_down_payment(&self, price: f64, expected_flow_yield: f64) -> f64 {
        let covered = expected_flow_yield
            / (self.interest_cover_ratio_limit * self.stressed_interest_rate);
        (price * (1.0 - covered)).max(0.0)
    }

    pub fn affords(&self, bid: &Bid, price: f64, expected_flow_yield: f64) -> bool {
        bid.liquid_reserves >= self.min_down_payment(price, expected_flow_yield)
    }
}

/// What a market can do beyond the price-quality matching every market has.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capabilities {
    pub kind: MarketKind,
    /// Keep a second, yield-ranked queue for investor bids
    pub investor_queue: bool,
    pub affordability: Option<DownPaymentRule>,
}

impl Capabilities {
    pub fn sale(config: &MarketConfig) -> Self {
        Capabilities {
            kind: MarketKind::Sale,
            investor_queue: true,
            affordability: Some(DownPaymentRule {
                interest_cover_ratio_limit: config.interest_cover_ratio_limit,
                stressed_interest_rate: config.btl_stressed_interest_rate,
            }),
        }
    }

    pub fn rental() -> Self {
        Capabilities {
            kind: MarketKind::Rental,
            investor_queue: false,
            affordability: None,
        }
    }
}

/// Regional inputs a clear needs from outside the market.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearingContext<'a> {
    pub month: usize,
    /// Households in the region; sizes the round budget
    pub population: usize,
    /// Expected annual rent income per quality band, for yield ranking
    pub annual_rent_flow: &'a [f64],
    /// Regional expected gross rental yield, for the down-payment rule
    pub expected_flow_yield: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueSizes {
    pub offers: usize,
    pub price_quality: usize,
    pub price_yield: Option<usize>,
    pub bids: usize,
}

#[derive(Debug, Clone)]
pub struct Market {
    capabilities: Capabilities,
    bid_up: BidUp,
    round_budget_floor: usize,
    round_budget_divisor: usize,
    requeue_underbidders: bool,

    offers: BTreeMap<OfferId, OfferRecord>,
    quality_queue: PriorityQueue2D,
    yield_queue: Option<PriorityQueue2D>,
    bids: Vec<Bid>,
    next_offer_id: usize,

    phase: MarketPhase,
    rng: StdRng,
}

impl Market {
    pub fn new(capabilities: Capabilities, config: &MarketConfig, seed: u64) -> Self {
        let yield_queue = capabilities
            .investor_queue
            .then(|| PriorityQueue2D::new(config.n_quality_bands));
        Market {
            capabilities,
            bid_up: BidUp::from_config(config),
            round_budget_floor: config.round_budget_floor,
            round_budget_divisor: config.round_budget_divisor.max(1),
            requeue_underbidders: config.requeue_underbidders,
            offers: BTreeMap::new(),
            quality_queue: PriorityQueue2D::new(config.n_quality_bands),
            yield_queue,
            bids: Vec::new(),
            next_offer_id: 0,
            phase: MarketPhase::Idle,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn sale(config: &MarketConfig, seed: u64) -> Self {
        Self::new(Capabilities::sale(config), config, seed)
    }

    pub fn rental(config: &MarketConfig, seed: u64) -> Self {
        Self::new(Capabilities::rental(), config, seed)
    }

    pub fn kind(&self) -> MarketKind {
        self.capabilities.kind
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn phase(&self) -> MarketPhase {
        self.phase
    }

    pub fn offer(&self, id: OfferId) -> Option<&OfferRecord> {
        self.offers.get(&id)
    }

    pub fn offers(&self) -> impl Iterator<Item = &OfferRecord> {
        self.offers.values()
    }

    pub fn n_offers(&self) -> usize {
        self.offers.len()
    }

    pub fn bids(&self) -> &[Bid] {
        &self.bids
    }

    pub fn queue_sizes(&self) -> QueueSizes {
        QueueSizes {
            offers: self.offers.len(),
            price_quality: self.quality_queue.len(),
            price_yield: self.yield_queue.as_ref().map(PriorityQueue2D::len),
            bids: self.bids.len(),
        }
    }

    pub fn round_budget(&self, population: usize) -> usize {
        self.round_budget_floor.max(population / self.round_budget_divisor)
    }

    /// Put a dwelling on this market and register the offer in every queue.
    pub fn list_offer(
        &mut self,
        dwellings: &mut Dwellings,
        dwelling: DwellingId,
        price: f64,
        investor_offer: bool,
        month: usize,
    ) -> Result<OfferId, MarketError> {
        check_price(price)?;
        let kind = self.kind();
        let target = dwellings
            .get_mut(dwelling)
            .ok_or(MarketError::UnknownDwelling(dwelling))?;
        let listed = target.offer(kind);
        debug_assert!(listed.is_none(), "{dwelling} listed twice on the {kind} market");
        if let Some(offer) = listed {
            return Err(MarketError::AlreadyListed {
                dwelling,
                kind,
                offer,
            });
        }

        let id = OfferId(self.next_offer_id);
        let record = OfferRecord::new(id, dwelling, target.quality(), price, month, investor_offer);
        self.quality_queue.insert(&record)?;
        if let Some(queue) = self.yield_queue.as_mut() {
            if let Err(err) = queue.insert(&record) {
                self.quality_queue.remove(id);
                return Err(err);
            }
        }

        self.next_offer_id += 1;
        target.set_offer(kind, Some(id));
        self.offers.insert(id, record);
        self.phase = MarketPhase::Collecting;
        Ok(id)
    }

    /// Submit a bid for this month. An investor bid on a market without an
    /// investor queue is ranked by quality like any other.
    pub fn bid(
        &mut self,
        bidder: HouseholdId,
        max_price: f64,
        investor: bool,
        liquid_reserves: f64,
    ) {
        self.submit(Bid {
            bidder,
            max_price,
            investor,
            liquid_reserves,
        });
    }

    pub fn submit(&mut self, bid: Bid) {
        self.bids.push(bid);
        self.phase = MarketPhase::Collecting;
    }

    /// Drop every waiting bid from `bidder`. Returns how many were dropped.
    pub fn retract_bids(&mut self, bidder: HouseholdId) -> usize {
        let before = self.bids.len();
        self.bids.retain(|bid| bid.bidder != bidder);
        before - self.bids.len()
    }

    /// Reprice a listed offer. The listing month is kept.
    pub fn update_offer(&mut self, id: OfferId, new_price: f64) -> Result<(), MarketError> {
        check_price(new_price)?;
        debug_assert!(self.offers.contains_key(&id), "repricing unlisted {id}");
        let record = self.offers.get_mut(&id).ok_or(MarketError::OfferNotListed(id))?;
        // Out of every queue before the key changes
        self.quality_queue.remove(id);
        if let Some(queue) = self.yield_queue.as_mut() {
            queue.remove(id);
        }
        record.set_price(new_price);
        self.quality_queue.insert(record)?;
        if let Some(queue) = self.yield_queue.as_mut() {
            queue.insert(record)?;
        }
        Ok(())
    }

    pub fn withdraw_offer(
        &mut self,
        dwellings: &mut Dwellings,
        id: OfferId,
    ) -> Result<OfferRecord, MarketError> {
        debug_assert!(self.offers.contains_key(&id), "withdrawing unlisted {id}");
        let record = self.offers.remove(&id).ok_or(MarketError::OfferNotListed(id))?;
        self.remove_from_queues(id);
        if let Some(dwelling) = dwellings.get_mut(record.dwelling()) {
            dwelling.set_offer(self.kind(), None);
        }
        Ok(record)
    }

    /// Withdraw whatever offer the dwelling has on this market.
    pub fn withdraw_dwelling(
        &mut self,
        dwellings: &mut Dwellings,
        dwelling: DwellingId,
    ) -> Result<OfferRecord, MarketError> {
        let kind = self.kind();
        let offer = dwellings
            .get(dwelling)
            .ok_or(MarketError::UnknownDwelling(dwelling))?
            .offer(kind)
            .ok_or(MarketError::DwellingNotListed { dwelling, kind })?;
        self.withdraw_offer(dwellings, offer)
    }

    fn remove_from_queues(&mut self, id: OfferId) {
        self.quality_queue.remove(id);
        if let Some(queue) = self.yield_queue.as_mut() {
            queue.remove(id);
        }
    }

    /// Run this month's clearing and return what happened.
    ///
    /// Every commit updates `dwellings` and is passed to `listener` before the
    /// next offer is resolved. Bids still waiting at the end are dropped.
    pub fn clear(
        &mut self,
        dwellings: &mut Dwellings,
        context: &ClearingContext<'_>,
        listener: &mut dyn TransactionListener,
    ) -> ClearingReport {
        self.phase = MarketPhase::Clearing;
        self.quality_queue.prepare();
        if let Some(queue) = self.yield_queue.as_mut() {
            queue.prepare();
        }

        let mut report =
            ClearingReport::new(self.kind(), context.month, self.bids.len(), self.offers.len());
        report.round_budget = self.round_budget(context.population);

        while report.rounds < report.round_budget
            && !self.bids.is_empty()
            && !self.quality_queue.is_empty()
        {
            let matched = self.match_bids(dwellings, context, &mut report);
            let sold = self.resolve_matches(matched, dwellings, context, listener, &mut report);
            report.rounds += 1;
            debug!(
                kind = %self.kind(),
                round = report.rounds,
                sold,
                requeued = self.bids.len(),
                offers = self.offers.len(),
                "clearing round done"
            );
        }

        report.expired = self.bids.len();
        self.bids.clear();
        self.phase = MarketPhase::Idle;
        info!(
            kind = %self.kind(),
            month = context.month,
            bids = report.bids_submitted,
            offers = report.offers_listed,
            transactions = report.transactions.len(),
            rounds = report.rounds,
            "market cleared"
        );
        report
    }

    fn best_offer(&self, bid: &Bid, context: &ClearingContext<'_>) -> Option<OfferId> {
        match self.yield_queue.as_ref() {
            Some(queue) if bid.investor => {
                let best = queue.best_for(
                    bid.max_price,
                    Dominance::PriceYield {
                        annual_rent_flow: context.annual_rent_flow,
                    },
                )?;
                match self.capabilities.affordability {
                    Some(rule) => {
                        let price = self.offers.get(&best)?.price();
                        rule.affords(bid, price, context.expected_flow_yield)
                            .then_some(best)
                    }
                    None => Some(best),
                }
            }
            _ => self.quality_queue.best_for(bid.max_price, Dominance::PriceQuality),
        }
    }

    /// Point every waiting bid at its best offer. Returns the offers that got
    /// at least one bid, in price-quality queue order.
    fn match_bids(
        &mut self,
        dwellings: &Dwellings,
        context: &ClearingContext<'_>,
        report: &mut ClearingReport,
    ) -> Vec<OfferId> {
        for bid in std::mem::take(&mut self.bids) {
            let Some(id) = self.best_offer(&bid, context) else {
                report.unmatched += 1;
                continue;
            };
            let Some(offer) = self.offers.get_mut(&id) else {
                warn!(%id, "queue holds an offer the market no longer knows");
                report.unmatched += 1;
                continue;
            };
            let owner = dwellings.get(offer.dwelling()).and_then(|d| d.owner());
            if owner == Some(bid.bidder) {
                report.self_matches += 1;
                continue;
            }
            offer.matched_bids.push(bid);
        }
        self.quality_queue
            .iter()
            .filter(|id| {
                self.offers
                    .get(id)
                    .is_some_and(|offer| !offer.matched_bids.is_empty())
            })
            .collect()
    }

    fn resolve_matches(
        &mut self,
        matched: Vec<OfferId>,
        dwellings: &mut Dwellings,
        context: &ClearingContext<'_>,
        listener: &mut dyn TransactionListener,
        report: &mut ClearingReport,
    ) -> usize {
        let mut sold = 0;
        for id in matched {
            let Some(offer) = self.offers.get_mut(&id) else {
                continue;
            };
            let mut bids = std::mem::take(&mut offer.matched_bids);
            let list_price = offer.price();
            let competing = bids.len();

            let (winner, sale_price) = if competing == 1 {
                (bids[0], list_price)
            } else {
                let bid_up_price = self.bid_up.sale_price(list_price, competing, &mut self.rng);
                let resolution = select_winner(&mut bids, bid_up_price, &mut self.rng);
                for (index, loser) in bids.iter().enumerate() {
                    if index == resolution.winner {
                        continue;
                    }
                    if self.requeue_underbidders || resolution.is_qualifying_loser(index) {
                        self.bids.push(*loser);
                        report.requeued += 1;
                    } else {
                        report.outbid_discarded += 1;
                    }
                }
                (bids[resolution.winner], resolution.sale_price)
            };

            let Some(transaction) = self.commit(id, winner, sale_price, competing, dwellings, context)
            else {
                // The offer is gone, the winner gets another round
                self.bids.push(winner);
                report.requeued += 1;
                continue;
            };
            match transaction.kind {
                MarketKind::Sale => listener.on_sale_completed(&transaction),
                MarketKind::Rental => listener.on_rental_completed(&transaction),
            }
            report.transactions.push(transaction);
            sold += 1;
        }
        sold
    }

    /// Take the offer off the market and move the dwelling to the winner.
    ///
    /// Returns `None`, having dropped the offer, only when its dwelling is not
    /// in the registry. Nothing after that check can fail.
    fn commit(
        &mut self,
        id: OfferId,
        bid: Bid,
        price: f64,
        competing_bids: usize,
        dwellings: &mut Dwellings,
        context: &ClearingContext<'_>,
    ) -> Option<Transaction> {
        let mut offer = self.offers.remove(&id)?;
        // Queues before the price changes: the record is keyed by its list price
        self.remove_from_queues(id);

        let kind = self.kind();
        let dwelling = offer.dwelling();
        let Some(target) = dwellings.get_mut(dwelling) else {
            warn!(%dwelling, %id, "dropping offer for an unknown dwelling");
            return None;
        };
        target.set_offer(kind, None);
        let seller = target.owner();
        let list_price = offer.price();
        offer.set_price(price);

        let (vacated, displaced) = match kind {
            MarketKind::Sale => {
                let transfer = dwellings.transfer_known(dwelling, bid.bidder);
                let displaced = transfer
                    .previous_resident
                    .filter(|resident| Some(*resident) != transfer.previous_owner);
                let vacated = if bid.investor {
                    None
                } else {
                    dwellings.move_in_known(bid.bidder, dwelling).previous_home
                };
                (vacated, displaced)
            }
            MarketKind::Rental => {
                let relocation = dwellings.move_in_known(bid.bidder, dwelling);
                (relocation.previous_home, relocation.displaced)
            }
        };

        Some(Transaction {
            kind,
            month: context.month,
            offer: id,
            dwelling,
            quality: offer.quality(),
            buyer: bid.bidder,
            seller,
            price,
            list_price,
            listed_at: offer.listed_at(),
            investor_bid: bid.investor,
            investor_offer: offer.is_investor_offer(),
            competing_bids,
            vacated,
            displaced,
        })
    }
}

fn check_price(price: f64) -> Result<(), MarketError> {
    if price.is_finite() && price > 0.0 {
        Ok(())
    } else {
        Err(MarketError::InvalidPrice(price))
    }
}
