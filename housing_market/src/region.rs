//! A region: one sale market and one rental market over a shared dwelling stock.
//!
//! The region owns the follow-up work a commit leaves behind. After the sale
//! market clears, dwellings that changed hands are taken off the rental market,
//! homes vacated by buyers are put back on the market by their owners, and
//! vacant buy-to-let purchases are offered for rent, all before the rental
//! market clears in the same month.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::SimulationConfig;
use crate::dwelling::Dwellings;
use crate::error::MarketError;
use crate::market::{ClearingContext, Market, MarketKind};
use crate::record::Bid;
use crate::stats::{MonthlySummary, RegionStats};
use crate::transaction::{ClearingReport, Fanout, Transaction, TransactionListener};
use crate::{DwellingId, HouseholdId, OfferId};

/// Listings the region made or removed on its own while settling commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Settlement {
    /// Sold dwellings taken off the rental market
    pub rentals_withdrawn: usize,
    /// Vacated or newly bought dwellings offered for rent
    pub listed_for_rent: usize,
    /// Homes left empty by their owner and offered for sale
    pub listed_for_sale: usize,
    /// Rental bids from households that bought this month
    pub rental_bids_retracted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthReport {
    pub region: usize,
    pub month: usize,
    pub sale: ClearingReport,
    pub rental: ClearingReport,
    pub settlement: Settlement,
    pub summary: MonthlySummary,
}

impl MonthReport {
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.sale.transactions.iter().chain(&self.rental.transactions)
    }
}

#[derive(Debug, Clone)]
pub struct Region {
    id: usize,
    sale: Market,
    rental: Market,
    dwellings: Dwellings,
    stats: RegionStats,
    population: usize,
    /// Markup applied when the region lists a home on an owner's behalf
    list_markup: f64,
}

impl Region {
    pub fn new(id: usize, config: &SimulationConfig, seed: u64) -> Self {
        let market = &config.market;
        Region {
            id,
            sale: Market::sale(market, seed),
            rental: Market::rental(market, seed.wrapping_add(1)),
            dwellings: Dwellings::new(market.n_quality_bands),
            stats: RegionStats::new(config),
            population: config.simulation.households,
            list_markup: config.households.list_markup,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn market(&self, kind: MarketKind) -> &Market {
        match kind {
            MarketKind::Sale => &self.sale,
            MarketKind::Rental => &self.rental,
        }
    }

    fn market_mut(&mut self, kind: MarketKind) -> &mut Market {
        match kind {
            MarketKind::Sale => &mut self.sale,
            MarketKind::Rental => &mut self.rental,
        }
    }

    pub fn dwellings(&self) -> &Dwellings {
        &self.dwellings
    }

    /// Direct access for the initial endowment of the stock.
    pub fn dwellings_mut(&mut self) -> &mut Dwellings {
        &mut self.dwellings
    }

    pub fn stats(&self) -> &RegionStats {
        &self.stats
    }

    pub fn population(&self) -> usize {
        self.population
    }

    pub fn set_population(&mut self, population: usize) {
        self.population = population;
    }

    /// Expected rent of a dwelling on this region's rental market.
    pub fn expected_rent(&self, dwelling: DwellingId) -> Option<f64> {
        let quality = self.dwellings.get(dwelling)?.quality();
        self.stats.expected_rent(quality)
    }

    pub fn expected_sale_price(&self, dwelling: DwellingId) -> Option<f64> {
        let quality = self.dwellings.get(dwelling)?.quality();
        self.stats.expected_sale_price(quality)
    }

    /// List or reprice a dwelling on one of the markets. A dwelling that isn't
    /// its owner's home is listed as an investor offer.
    pub fn offer(
        &mut self,
        kind: MarketKind,
        dwelling: DwellingId,
        price: f64,
        month: usize,
    ) -> Result<OfferId, MarketError> {
        let target = self
            .dwellings
            .get(dwelling)
            .ok_or(MarketError::UnknownDwelling(dwelling))?;
        let investor_offer = target.owner().is_none() || target.owner() != target.resident();
        if let Some(existing) = target.offer(kind) {
            self.market_mut(kind).update_offer(existing, price)?;
            return Ok(existing);
        }
        let market = match kind {
            MarketKind::Sale => &mut self.sale,
            MarketKind::Rental => &mut self.rental,
        };
        market.list_offer(&mut self.dwellings, dwelling, price, investor_offer, month)
    }

    pub fn withdraw(&mut self, kind: MarketKind, dwelling: DwellingId) -> Result<(), MarketError> {
        let market = match kind {
            MarketKind::Sale => &mut self.sale,
            MarketKind::Rental => &mut self.rental,
        };
        market.withdraw_dwelling(&mut self.dwellings, dwelling)?;
        Ok(())
    }

    pub fn bid(&mut self, kind: MarketKind, bid: Bid) {
        self.market_mut(kind).submit(bid);
    }

    /// End a tenancy: the tenant leaves and the dwelling goes back on the
    /// rental market at the expected rent.
    pub fn end_tenancy(
        &mut self,
        dwelling: DwellingId,
        month: usize,
    ) -> Result<Option<HouseholdId>, MarketError> {
        let tenant = self.dwellings.move_out(dwelling)?;
        if let Some(rent) = self.expected_rent(dwelling) {
            if !self.is_listed(MarketKind::Rental, dwelling) {
                self.offer(MarketKind::Rental, dwelling, rent, month)?;
            }
        }
        Ok(tenant)
    }

    fn is_listed(&self, kind: MarketKind, dwelling: DwellingId) -> bool {
        self.dwellings
            .get(dwelling)
            .is_some_and(|target| target.is_on_market(kind))
    }

    /// Clear the sale market, settle its commits, then clear the rental market.
    pub fn clear(&mut self, month: usize, listener: &mut dyn TransactionListener) -> MonthReport {
        let sale = self.clear_market(MarketKind::Sale, month, listener);
        let mut settlement = Settlement::default();
        for transaction in &sale.transactions {
            self.settle_sale(transaction, &mut settlement);
        }
        // A household that just bought a home no longer looks for a rental
        for transaction in sale.transactions.iter().filter(|t| !t.investor_bid) {
            settlement.rental_bids_retracted += self.rental.retract_bids(transaction.buyer);
        }

        let rental = self.clear_market(MarketKind::Rental, month, listener);
        for transaction in &rental.transactions {
            self.settle_letting(transaction, &mut settlement);
        }

        let summary = self.stats.post_clearing_record(month);
        debug!(
            region = self.id,
            month,
            sales = sale.transactions.len(),
            lettings = rental.transactions.len(),
            ?settlement,
            "region cleared"
        );
        MonthReport {
            region: self.id,
            month,
            sale,
            rental,
            settlement,
            summary,
        }
    }

    fn clear_market(
        &mut self,
        kind: MarketKind,
        month: usize,
        listener: &mut dyn TransactionListener,
    ) -> ClearingReport {
        let annual_rent_flow = self.stats.annual_rent_flow().to_vec();
        let context = ClearingContext {
            month,
            population: self.population,
            annual_rent_flow: &annual_rent_flow,
            expected_flow_yield: self.stats.exp_av_flow_yield(),
        };
        let market = match kind {
            MarketKind::Sale => &mut self.sale,
            MarketKind::Rental => &mut self.rental,
        };
        let mut listeners =
            Fanout::new(vec![&mut self.stats as &mut dyn TransactionListener, listener]);
        market.clear(&mut self.dwellings, &context, &mut listeners)
    }

    fn settle_sale(&mut self, sale: &Transaction, settlement: &mut Settlement) {
        if self.is_listed(MarketKind::Rental, sale.dwelling) {
            match self.withdraw(MarketKind::Rental, sale.dwelling) {
                Ok(()) => settlement.rentals_withdrawn += 1,
                Err(err) => warn!(%err, "could not withdraw sold dwelling from rental market"),
            }
        }
        if let Some(previous) = sale.vacated {
            self.relist_vacated(previous, sale.buyer, sale.month, settlement);
        }
        let vacant = self
            .dwellings
            .get(sale.dwelling)
            .is_some_and(|dwelling| dwelling.is_vacant());
        if sale.investor_bid && vacant {
            self.list_for_rent(sale.dwelling, sale.month, settlement);
        }
    }

    fn settle_letting(&mut self, letting: &Transaction, settlement: &mut Settlement) {
        if let Some(previous) = letting.vacated {
            self.relist_vacated(previous, letting.buyer, letting.month, settlement);
        }
    }

    /// A household moved out of `previous`: a landlord's dwelling goes back on
    /// the rental market, an owner's own former home goes up for sale.
    fn relist_vacated(
        &mut self,
        previous: DwellingId,
        mover: HouseholdId,
        month: usize,
        settlement: &mut Settlement,
    ) {
        let Some(owner) = self.dwellings.get(previous).and_then(|d| d.owner()) else {
            return;
        };
        if owner == mover {
            if self.is_listed(MarketKind::Sale, previous) {
                return;
            }
            let Some(price) = self.expected_sale_price(previous) else {
                return;
            };
            match self.offer(MarketKind::Sale, previous, price * self.list_markup, month) {
                Ok(_) => settlement.listed_for_sale += 1,
                Err(err) => warn!(%err, "could not list vacated home for sale"),
            }
        } else {
            self.list_for_rent(previous, month, settlement);
        }
    }

    fn list_for_rent(&mut self, dwelling: DwellingId, month: usize, settlement: &mut Settlement) {
        if self.is_listed(MarketKind::Rental, dwelling) {
            return;
        }
        let Some(rent) = self.expected_rent(dwelling) else {
            return;
        };
        match self.offer(MarketKind::Rental, dwelling, rent, month) {
            Ok(_) => settlement.listed_for_rent += 1,
            Err(err) => warn!(%err, "could not list dwelling for rent"),
        }
    }
}
