//! Run output: a monthly time series (CSV), optionally every transaction
//! (CSV), and a JSON summary with the configuration used.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{OutputSettings, SimulationConfig};
use crate::coordinator::RegionStatsSnapshot;
use crate::error::OutputError;
use crate::household::{HouseholdStats, Tenure};
use crate::region::MonthReport;
use crate::simulation::Stats;
use crate::transaction::Transaction;

/// One row of the monthly time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarketTimePoint {
    pub month: usize,

    pub sales: usize,
    pub sale_bids: usize,
    pub sale_offers: usize,
    pub sale_rounds: usize,
    pub sale_expired_bids: usize,
    pub average_sale_price: f64,
    pub house_price_index: f64,
    pub average_bid_up: f64,
    pub average_competing_bids: f64,
    pub sale_months_on_market: f64,

    pub lettings: usize,
    pub rental_bids: usize,
    pub rental_offers: usize,
    pub average_rent: f64,
    pub rent_index: f64,
    pub rental_months_on_market: f64,

    pub average_occupancy: f64,
    pub av_flow_yield: f64,
    pub exp_av_flow_yield: f64,
    pub listed_for_rent: usize,
    pub rentals_withdrawn: usize,
}

impl From<&MonthReport> for MarketTimePoint {
    fn from(report: &MonthReport) -> Self {
        let summary = &report.summary;
        MarketTimePoint {
            month: report.month,
            sales: summary.sale.transactions,
            sale_bids: report.sale.bids_submitted,
            sale_offers: report.sale.offers_listed,
            sale_rounds: report.sale.rounds,
            sale_expired_bids: report.sale.expired,
            average_sale_price: summary.sale.average_price,
            house_price_index: summary.sale.price_index,
            average_bid_up: summary.sale.average_bid_up,
            average_competing_bids: summary.sale.average_competing_bids,
            sale_months_on_market: summary.sale.average_months_on_market,
            lettings: summary.rental.transactions,
            rental_bids: report.rental.bids_submitted,
            rental_offers: report.rental.offers_listed,
            average_rent: summary.rental.average_price,
            rent_index: summary.rental.price_index,
            rental_months_on_market: summary.rental.average_months_on_market,
            average_occupancy: summary.average_occupancy,
            av_flow_yield: summary.av_flow_yield,
            exp_av_flow_yield: summary.exp_av_flow_yield,
            listed_for_rent: report.settlement.listed_for_rent,
            rentals_withdrawn: report.settlement.rentals_withdrawn,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationMetadata {
    pub config: SimulationConfig,
    pub seed: u64,
    pub months: usize,
    pub timestamp: String,
}

/// End-of-run figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_sales: usize,
    pub total_lettings: usize,
    pub final_house_price_index: f64,
    pub final_rent_index: f64,
    pub mean_bid_up: f64,
    pub final_exp_av_flow_yield: f64,
    pub owner_occupiers: usize,
    pub renters: usize,
    pub homeless: usize,
    pub landlords: usize,
    pub vacant_dwellings: usize,
    pub unsold_offers: usize,
    pub unlet_offers: usize,
    pub rejected_requests: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationOutput {
    pub metadata: SimulationMetadata,
    pub summary: RunSummary,
    pub timeseries: Vec<MarketTimePoint>,
    #[serde(skip)]
    pub transactions: Vec<Transaction>,
}

impl SimulationOutput {
    /// Collect the agents' stats after a run.
    pub fn from_stats(
        all_stats: Vec<Stats>,
        config: &SimulationConfig,
    ) -> Result<Self, OutputError> {
        let mut region: Option<RegionStatsSnapshot> = None;
        let mut households: Vec<HouseholdStats> = Vec::new();
        for stats in all_stats {
            match stats {
                Stats::Region(snapshot) => region = Some(snapshot),
                Stats::Household(household) => households.push(household),
            }
        }
        let region = region.ok_or(OutputError::MissingRegion)?;

        let timeseries: Vec<MarketTimePoint> =
            region.months.iter().map(MarketTimePoint::from).collect();
        let summary = summarise(&region, &timeseries, &households);

        Ok(SimulationOutput {
            metadata: SimulationMetadata {
                config: config.clone(),
                seed: config.simulation.seed,
                months: config.simulation.months,
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
            summary,
            timeseries,
            transactions: region.transactions,
        })
    }

    pub fn write_timeseries_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), OutputError> {
        let mut wtr = csv::Writer::from_path(path)?;
        for point in &self.timeseries {
            wtr.serialize(point)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_transactions_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), OutputError> {
        let mut wtr = csv::Writer::from_path(path)?;
        for transaction in &self.transactions {
            wtr.serialize(TransactionRow::from(transaction))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), OutputError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Write whatever the settings ask for and return the files written.
    pub fn write_all(&self, settings: &OutputSettings) -> Result<Vec<PathBuf>, OutputError> {
        let directory = PathBuf::from(&settings.directory);
        fs::create_dir_all(&directory)?;
        let mut written = Vec::new();
        if settings.write_timeseries {
            let path = directory.join("timeseries.csv");
            self.write_timeseries_csv(&path)?;
            written.push(path);
        }
        if settings.write_transactions {
            let path = directory.join("transactions.csv");
            self.write_transactions_csv(&path)?;
            written.push(path);
        }
        if settings.write_summary {
            let path = directory.join("summary.json");
            self.write_json(&path)?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Flat form of a [`Transaction`] for CSV.
#[derive(Debug, Serialize)]
struct TransactionRow {
    kind: String,
    month: usize,
    offer: usize,
    dwelling: usize,
    quality: usize,
    buyer: usize,
    seller: Option<usize>,
    price: f64,
    list_price: f64,
    months_on_market: usize,
    investor_bid: bool,
    investor_offer: bool,
    competing_bids: usize,
}

impl From<&Transaction> for TransactionRow {
    fn from(transaction: &Transaction) -> Self {
        TransactionRow {
            kind: transaction.kind.to_string(),
            month: transaction.month,
            offer: transaction.offer.0,
            dwelling: transaction.dwelling.0,
            quality: transaction.quality,
            buyer: transaction.buyer.0,
            seller: transaction.seller.map(|seller| seller.0),
            price: transaction.price,
            list_price: transaction.list_price,
            months_on_market: transaction.months_on_market(),
            investor_bid: transaction.investor_bid,
            investor_offer: transaction.investor_offer,
            competing_bids: transaction.competing_bids,
        }
    }
}

fn summarise(
    region: &RegionStatsSnapshot,
    timeseries: &[MarketTimePoint],
    households: &[HouseholdStats],
) -> RunSummary {
    let total_sales: usize = timeseries.iter().map(|point| point.sales).sum();
    let bid_up_weighted: f64 = timeseries
        .iter()
        .map(|point| point.average_bid_up * point.sales as f64)
        .sum();
    let last = timeseries.last();
    RunSummary {
        total_sales,
        total_lettings: timeseries.iter().map(|point| point.lettings).sum(),
        final_house_price_index: last.map_or(1.0, |point| point.house_price_index),
        final_rent_index: last.map_or(1.0, |point| point.rent_index),
        mean_bid_up: if total_sales > 0 {
            bid_up_weighted / total_sales as f64
        } else {
            1.0
        },
        final_exp_av_flow_yield: last.map_or(0.0, |point| point.exp_av_flow_yield),
        owner_occupiers: households
            .iter()
            .filter(|h| matches!(h.tenure, Tenure::Owner(_)))
            .count(),
        renters: households
            .iter()
            .filter(|h| matches!(h.tenure, Tenure::Renter { .. }))
            .count(),
        homeless: households
            .iter()
            .filter(|h| h.tenure == Tenure::Homeless)
            .count(),
        landlords: households.iter().filter(|h| h.dwellings_let > 0).count(),
        vacant_dwellings: region.vacant_dwellings,
        unsold_offers: region.sale_offers,
        unlet_offers: region.rental_offers,
        rejected_requests: region.rejected_requests,
    }
}
