//! Regional price, rent and yield statistics.
//!
//! Commits are accumulated per quality band while a market clears; after both
//! markets have cleared, [`RegionStats::post_clearing_record`] folds the month
//! into exponential moving averages. Those averages feed back into the next
//! clear: expected rent flow per band ranks investor bids, and the expected
//! flow yield sets the buy-to-let down payment.

use serde::Serialize;

use crate::config::SimulationConfig;
use crate::market::MarketKind;
use crate::transaction::{Transaction, TransactionListener};
use crate::MONTHS_IN_YEAR;

/// Moving averages for one market (sale or rental) of a region.
#[derive(Debug, Clone)]
pub struct MarketStats {
    kind: MarketKind,
    decay: f64,
    months_decay: f64,
    exp_av_price: Vec<f64>,
    exp_av_months_on_market: Vec<f64>,
    /// Mean of the initial expected prices, the HPI base
    index_base: f64,

    // Current month
    price_sum: Vec<f64>,
    months_sum: Vec<f64>,
    count: Vec<usize>,
    bid_up_sum: f64,
    competing_bids: usize,

    total_transactions: usize,
}

/// One month of one market, after the averages were updated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub transactions: usize,
    pub average_price: f64,
    pub average_months_on_market: f64,
    /// Mean sale over list price of this month's commits, 1.0 without commits
    pub average_bid_up: f64,
    pub average_competing_bids: f64,
    /// Mean expected price relative to the first month
    pub price_index: f64,
}

impl MarketStats {
    pub fn new(kind: MarketKind, initial_prices: Vec<f64>, decay: f64, months_decay: f64) -> Self {
        let n_bands = initial_prices.len();
        let index_base = mean(&initial_prices).unwrap_or(1.0);
        MarketStats {
            kind,
            decay,
            months_decay,
            exp_av_price: initial_prices,
            exp_av_months_on_market: vec![1.0; n_bands],
            index_base,
            price_sum: vec![0.0; n_bands],
            months_sum: vec![0.0; n_bands],
            count: vec![0; n_bands],
            bid_up_sum: 0.0,
            competing_bids: 0,
            total_transactions: 0,
        }
    }

    pub fn kind(&self) -> MarketKind {
        self.kind
    }

    pub fn record(&mut self, transaction: &Transaction) {
        let Some(count) = self.count.get_mut(transaction.quality) else {
            return;
        };
        *count += 1;
        self.price_sum[transaction.quality] += transaction.price;
        self.months_sum[transaction.quality] += transaction.months_on_market() as f64;
        self.bid_up_sum += transaction.bid_up_ratio();
        self.competing_bids += transaction.competing_bids;
    }

    /// Fold this month's commits into the averages and reset the accumulators.
    pub fn post_clearing_record(&mut self) -> MarketSnapshot {
        let transactions: usize = self.count.iter().sum();
        let mut snapshot = MarketSnapshot {
            transactions,
            average_bid_up: 1.0,
            ..MarketSnapshot::default()
        };
        if transactions > 0 {
            let n = transactions as f64;
            snapshot.average_price = self.price_sum.iter().sum::<f64>() / n;
            snapshot.average_months_on_market = self.months_sum.iter().sum::<f64>() / n;
            snapshot.average_bid_up = self.bid_up_sum / n;
            snapshot.average_competing_bids = self.competing_bids as f64 / n;
        }

        for band in 0..self.count.len() {
            if self.count[band] == 0 {
                continue;
            }
            let n = self.count[band] as f64;
            self.exp_av_price[band] = self.decay * self.exp_av_price[band]
                + (1.0 - self.decay) * self.price_sum[band] / n;
            self.exp_av_months_on_market[band] = self.months_decay
                * self.exp_av_months_on_market[band]
                + (1.0 - self.months_decay) * self.months_sum[band] / n;
        }
        snapshot.price_index = self.price_index();

        self.total_transactions += transactions;
        self.price_sum.fill(0.0);
        self.months_sum.fill(0.0);
        self.count.fill(0);
        self.bid_up_sum = 0.0;
        self.competing_bids = 0;
        snapshot
    }

    pub fn expected_price(&self, quality: usize) -> Option<f64> {
        self.exp_av_price.get(quality).copied()
    }

    pub fn expected_months_on_market(&self, quality: usize) -> Option<f64> {
        self.exp_av_months_on_market.get(quality).copied()
    }

    pub fn price_index(&self) -> f64 {
        match mean(&self.exp_av_price) {
            Some(current) if self.index_base > 0.0 => current / self.index_base,
            _ => 1.0,
        }
    }

    pub fn total_transactions(&self) -> usize {
        self.total_transactions
    }
}

/// Sale and rental statistics of a region, plus the yield figures derived
/// from both.
#[derive(Debug, Clone)]
pub struct RegionStats {
    sale: MarketStats,
    rental: MarketStats,
    tenancy_length_months: f64,
    yield_decay: f64,
    occupancy: Vec<f64>,
    annual_rent_flow: Vec<f64>,
    flow_yield: Vec<f64>,
    av_flow_yield: f64,
    exp_av_flow_yield: f64,
}

/// Statistics side of a month report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MonthlySummary {
    pub month: usize,
    pub sale: MarketSnapshot,
    pub rental: MarketSnapshot,
    pub average_occupancy: f64,
    pub av_flow_yield: f64,
    pub exp_av_flow_yield: f64,
}

impl RegionStats {
    /// Start from the reference prices, with rents at the initial gross yield
    /// and every band fully occupied.
    pub fn new(config: &SimulationConfig) -> Self {
        let market = &config.market;
        let n_bands = market.n_quality_bands;
        let gross_yield = market.initial_rent_gross_yield;
        let sale_prices = config.reference_prices();
        let rents: Vec<f64> = sale_prices
            .iter()
            .map(|price| price * gross_yield / MONTHS_IN_YEAR)
            .collect();
        let annual_rent_flow = rents.iter().map(|rent| rent * MONTHS_IN_YEAR).collect();
        let decay = market.price_average_decay;
        let months_decay = market.months_on_market_decay;
        RegionStats {
            sale: MarketStats::new(MarketKind::Sale, sale_prices, decay, months_decay),
            rental: MarketStats::new(MarketKind::Rental, rents, decay, months_decay),
            tenancy_length_months: market.tenancy_length_months,
            yield_decay: market.yield_average_decay,
            occupancy: vec![1.0; n_bands],
            annual_rent_flow,
            flow_yield: vec![gross_yield; n_bands],
            av_flow_yield: gross_yield,
            exp_av_flow_yield: gross_yield,
        }
    }

    pub fn market(&self, kind: MarketKind) -> &MarketStats {
        match kind {
            MarketKind::Sale => &self.sale,
            MarketKind::Rental => &self.rental,
        }
    }

    pub fn sale(&self) -> &MarketStats {
        &self.sale
    }

    pub fn rental(&self) -> &MarketStats {
        &self.rental
    }

    /// Expected annual rental income per quality band, net of voids.
    pub fn annual_rent_flow(&self) -> &[f64] {
        &self.annual_rent_flow
    }

    /// Expected share of the year a let dwelling of this band is occupied.
    pub fn occupancy(&self, quality: usize) -> Option<f64> {
        self.occupancy.get(quality).copied()
    }

    pub fn av_flow_yield(&self) -> f64 {
        self.av_flow_yield
    }

    pub fn exp_av_flow_yield(&self) -> f64 {
        self.exp_av_flow_yield
    }

    pub fn expected_sale_price(&self, quality: usize) -> Option<f64> {
        self.sale.expected_price(quality)
    }

    pub fn expected_rent(&self, quality: usize) -> Option<f64> {
        self.rental.expected_price(quality)
    }

    /// Flow yield of a band, kept from the last month its sale price was positive.
    pub fn flow_yield(&self, quality: usize) -> Option<f64> {
        self.flow_yield.get(quality).copied()
    }

    /// Recompute occupancy, rent flow and per-band yields. The average flow
    /// yield is weighted by this month's lettings per band and keeps its
    /// previous value in a month without lettings.
    fn update_yields(&mut self, lettings: &[usize]) {
        let tenancy = self.tenancy_length_months;
        let mut weighted = 0.0;
        for band in 0..self.occupancy.len() {
            let months = self.rental.exp_av_months_on_market[band];
            self.occupancy[band] = tenancy / (tenancy + months);
            self.annual_rent_flow[band] =
                self.rental.exp_av_price[band] * MONTHS_IN_YEAR * self.occupancy[band];
            let price = self.sale.exp_av_price[band];
            if price > 0.0 {
                self.flow_yield[band] = self.annual_rent_flow[band] / price;
            }
            weighted += self.flow_yield[band] * lettings[band] as f64;
        }
        let total: usize = lettings.iter().sum();
        if total > 0 {
            self.av_flow_yield = weighted / total as f64;
        }
    }

    /// Close the month: update both markets, then occupancy, rent flow and yields.
    pub fn post_clearing_record(&mut self, month: usize) -> MonthlySummary {
        let lettings = self.rental.count.clone();
        let sale = self.sale.post_clearing_record();
        let rental = self.rental.post_clearing_record();
        self.update_yields(&lettings);
        self.exp_av_flow_yield = self.yield_decay * self.exp_av_flow_yield
            + (1.0 - self.yield_decay) * self.av_flow_yield;
        MonthlySummary {
            month,
            sale,
            rental,
            average_occupancy: mean(&self.occupancy).unwrap_or(0.0),
            av_flow_yield: self.av_flow_yield,
            exp_av_flow_yield: self.exp_av_flow_yield,
        }
    }
}

impl TransactionListener for RegionStats {
    fn on_sale_completed(&mut self, sale: &Transaction) {
        self.sale.record(sale);
    }

    fn on_rental_completed(&mut self, letting: &Transaction) {
        self.rental.record(letting);
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DwellingId, HouseholdId, OfferId};
    use approx::assert_relative_eq;

    fn transaction(kind: MarketKind, quality: usize, price: f64, listed_at: usize) -> Transaction {
        Transaction {
            kind,
            month: 4,
            offer: OfferId(0),
            dwelling: DwellingId(0),
            quality,
            buyer: HouseholdId(1),
            seller: None,
            price,
            list_price: price / 1.02,
            listed_at,
            investor_bid: false,
            investor_offer: false,
            competing_bids: 2,
            vacated: None,
            displaced: None,
        }
    }

    #[test]
    fn moving_average_only_moves_traded_bands() {
        let mut stats = MarketStats::new(MarketKind::Sale, vec![100.0, 200.0], 0.8, 0.5);
        stats.record(&transaction(MarketKind::Sale, 1, 300.0, 2));
        let snapshot = stats.post_clearing_record();

        assert_eq!(snapshot.transactions, 1);
        assert_relative_eq!(snapshot.average_price, 300.0);
        assert_relative_eq!(snapshot.average_months_on_market, 2.0);
        assert_relative_eq!(snapshot.average_bid_up, 1.02, epsilon = 1e-12);
        assert_relative_eq!(stats.expected_price(0).unwrap(), 100.0);
        assert_relative_eq!(stats.expected_price(1).unwrap(), 0.8 * 200.0 + 0.2 * 300.0);
        assert_relative_eq!(stats.expected_months_on_market(0).unwrap(), 1.0);
        assert_relative_eq!(stats.expected_months_on_market(1).unwrap(), 0.5 * 1.0 + 0.5 * 2.0);
        assert_relative_eq!(snapshot.price_index, (100.0 + 220.0) / 300.0, epsilon = 1e-12);
    }

    #[test]
    fn empty_month_leaves_averages_alone() {
        let mut stats = MarketStats::new(MarketKind::Rental, vec![10.0; 3], 0.5, 0.5);
        let snapshot = stats.post_clearing_record();
        assert_eq!(snapshot.transactions, 0);
        assert_relative_eq!(snapshot.average_bid_up, 1.0);
        assert_relative_eq!(snapshot.price_index, 1.0);
    }

    #[test]
    fn out_of_range_quality_is_ignored() {
        let mut stats = MarketStats::new(MarketKind::Sale, vec![100.0], 0.8, 0.8);
        stats.record(&transaction(MarketKind::Sale, 7, 300.0, 0));
        assert_eq!(stats.post_clearing_record().transactions, 0);
    }

    #[test]
    fn initial_yield_is_the_gross_yield_at_full_occupancy() {
        let config = SimulationConfig::default();
        let stats = RegionStats::new(&config);
        let gross_yield = config.market.initial_rent_gross_yield;

        assert_relative_eq!(stats.occupancy(0).unwrap(), 1.0);
        assert_relative_eq!(stats.av_flow_yield(), gross_yield);
        assert_relative_eq!(stats.exp_av_flow_yield(), gross_yield);
        assert_eq!(stats.annual_rent_flow().len(), config.market.n_quality_bands);
        let band = 5;
        assert_relative_eq!(
            stats.annual_rent_flow()[band],
            stats.expected_sale_price(band).unwrap() * gross_yield,
            epsilon = 1e-9
        );
    }

    #[test]
    fn month_without_lettings_keeps_the_flow_yield() {
        let config = SimulationConfig::default();
        let mut stats = RegionStats::new(&config);
        stats.on_sale_completed(&transaction(MarketKind::Sale, 3, 150_000.0, 0));

        let summary = stats.post_clearing_record(1);
        assert_eq!(summary.rental.transactions, 0);
        assert_relative_eq!(summary.av_flow_yield, config.market.initial_rent_gross_yield);
        assert_relative_eq!(stats.exp_av_flow_yield(), config.market.initial_rent_gross_yield);
    }

    #[test]
    fn flow_yield_is_weighted_by_lettings_per_band() {
        let config = SimulationConfig::default();
        let mut stats = RegionStats::new(&config);
        let dear = stats.expected_rent(0).unwrap() * 3.0;
        let usual = stats.expected_rent(1).unwrap();
        stats.on_rental_completed(&transaction(MarketKind::Rental, 0, dear, 0));
        for _ in 0..3 {
            stats.on_rental_completed(&transaction(MarketKind::Rental, 1, usual, 4));
        }
        stats.post_clearing_record(1);

        let band_yield = |band: usize| {
            stats.expected_rent(band).unwrap() * MONTHS_IN_YEAR * stats.occupancy(band).unwrap()
                / stats.expected_sale_price(band).unwrap()
        };
        assert_relative_eq!(stats.flow_yield(0).unwrap(), band_yield(0), epsilon = 1e-12);
        assert_relative_eq!(
            stats.av_flow_yield(),
            (band_yield(0) + 3.0 * band_yield(1)) / 4.0,
            epsilon = 1e-12
        );
        let tenancy = config.market.tenancy_length_months;
        assert_relative_eq!(stats.occupancy(2).unwrap(), tenancy / (tenancy + 1.0));
    }

    #[test]
    fn listener_routes_by_market_kind() {
        let config = SimulationConfig::default();
        let mut stats = RegionStats::new(&config);
        stats.on_sale_completed(&transaction(MarketKind::Sale, 3, 150_000.0, 0));
        stats.on_rental_completed(&transaction(MarketKind::Rental, 3, 700.0, 0));
        stats.on_rental_completed(&transaction(MarketKind::Rental, 4, 750.0, 0));

        let summary = stats.post_clearing_record(5);
        assert_eq!(summary.month, 5);
        assert_eq!(summary.sale.transactions, 1);
        assert_eq!(summary.rental.transactions, 2);
        assert_eq!(stats.sale().total_transactions(), 1);
    }

    #[test]
    fn higher_rents_raise_expected_yield() {
        let config = SimulationConfig::default();
        let mut stats = RegionStats::new(&config);
        let before = stats.exp_av_flow_yield();
        for quality in 0..config.market.n_quality_bands {
            let rent = stats.expected_rent(quality).unwrap() * 3.0;
            stats.on_rental_completed(&transaction(MarketKind::Rental, quality, rent, 0));
        }
        stats.post_clearing_record(1);
        assert!(stats.exp_av_flow_yield() > before);
    }
}
