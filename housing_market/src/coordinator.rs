use serde::Serialize;
use tracing::{info, warn};

use crate::market::MarketKind;
use crate::region::{MonthReport, Region};
use crate::simulation::{Event, Stats, TICKS_PER_MONTH};
use crate::transaction::Transaction;
use crate::{DwellingId, HouseholdId};

/// Everything the coordinator observed over a run.
#[derive(Debug, Clone, Serialize)]
pub struct RegionStatsSnapshot {
    pub region: usize,
    pub months: Vec<MonthReport>,
    /// Empty unless the coordinator keeps transactions
    pub transactions: Vec<Transaction>,
    pub dwellings: usize,
    pub vacant_dwellings: usize,
    pub let_dwellings: usize,
    pub sale_offers: usize,
    pub rental_offers: usize,
    /// Offers, withdrawals and tenancy ends that did not match the dwelling registry
    pub rejected_requests: usize,
}

/// Agent that runs one region's markets.
///
/// At the start of a month it asks households for offers and bids, which
/// arrive within the same tick; one tick later it clears the region and
/// broadcasts every commit before starting the next month.
pub struct RegionCoordinator {
    region: Region,
    months: usize,
    keep_transactions: bool,
    history: Vec<MonthReport>,
    transactions: Vec<Transaction>,
    rejected_requests: usize,
}

impl RegionCoordinator {
    pub fn new(region: Region, months: usize, keep_transactions: bool) -> Self {
        RegionCoordinator {
            region,
            months,
            keep_transactions,
            history: Vec::with_capacity(months),
            transactions: Vec::new(),
            rejected_requests: 0,
        }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn history(&self) -> &[MonthReport] {
        &self.history
    }

    fn owns(&self, household: HouseholdId, dwelling: DwellingId) -> bool {
        self.region
            .dwellings()
            .get(dwelling)
            .is_some_and(|target| target.owner() == Some(household))
    }

    fn reject(&mut self, household: HouseholdId, dwelling: DwellingId, what: &str) {
        self.rejected_requests += 1;
        warn!(%household, %dwelling, "rejected {what}");
    }

    fn on_offer(
        &mut self,
        month: usize,
        household: HouseholdId,
        market: MarketKind,
        dwelling: DwellingId,
        price: f64,
    ) {
        if !self.owns(household, dwelling) {
            self.reject(household, dwelling, "offer from non-owner");
            return;
        }
        if let Err(err) = self.region.offer(market, dwelling, price, month) {
            warn!(%err, %household, "offer not listed");
            self.rejected_requests += 1;
        }
    }

    fn on_withdrawal(&mut self, household: HouseholdId, market: MarketKind, dwelling: DwellingId) {
        if !self.owns(household, dwelling) {
            self.reject(household, dwelling, "withdrawal from non-owner");
            return;
        }
        // The offer may have sold in the meantime
        if self
            .region
            .dwellings()
            .get(dwelling)
            .is_some_and(|target| target.is_on_market(market))
        {
            if let Err(err) = self.region.withdraw(market, dwelling) {
                warn!(%err, %household, "withdrawal failed");
                self.rejected_requests += 1;
            }
        }
    }

    fn on_tenancy_ended(&mut self, month: usize, household: HouseholdId, dwelling: DwellingId) {
        let resident = self.region.dwellings().get(dwelling).and_then(|d| d.resident());
        if resident != Some(household) {
            self.reject(household, dwelling, "tenancy end from non-resident");
            return;
        }
        if let Err(err) = self.region.end_tenancy(dwelling, month) {
            warn!(%err, %household, "tenancy end failed");
            self.rejected_requests += 1;
        }
    }

    fn on_clear(&mut self, current_t: usize, month: usize) -> des::Response<Event, Stats> {
        let mut committed: Vec<Transaction> = Vec::new();
        let report = self.region.clear(month, &mut committed);
        info!(
            month,
            sales = report.sale.transactions.len(),
            lettings = report.rental.transactions.len(),
            price_index = report.summary.sale.price_index,
            flow_yield = report.summary.exp_av_flow_yield,
            "month cleared"
        );

        let mut events: Vec<(usize, Event)> = committed
            .iter()
            .map(|transaction| {
                let event = match transaction.kind {
                    MarketKind::Sale => Event::SaleCompleted(transaction.clone()),
                    MarketKind::Rental => Event::RentalCompleted(transaction.clone()),
                };
                (current_t, event)
            })
            .collect();
        events.push((
            current_t,
            Event::MarketCleared {
                month,
                summary: report.summary,
            },
        ));
        events.push((current_t, Event::MonthEnd { month }));
        if month + 1 < self.months {
            events.push((
                current_t + 1,
                Event::MonthStart { month: month + 1 },
            ));
        }

        if self.keep_transactions {
            self.transactions.extend(committed);
        }
        self.history.push(report);
        des::Response::events(events)
    }
}

impl des::Agent<Event, Stats> for RegionCoordinator {
    fn stats(&self) -> Stats {
        let dwellings = self.region.dwellings();
        Stats::Region(RegionStatsSnapshot {
            region: self.region.id(),
            months: self.history.clone(),
            transactions: self.transactions.clone(),
            dwellings: dwellings.len(),
            vacant_dwellings: dwellings.vacant().count(),
            let_dwellings: dwellings.iter().filter(|d| d.is_let()).count(),
            sale_offers: self.region.market(MarketKind::Sale).n_offers(),
            rental_offers: self.region.market(MarketKind::Rental).n_offers(),
            rejected_requests: self.rejected_requests,
        })
    }

    fn act(&mut self, current_t: usize, event: &Event) -> des::Response<Event, Stats> {
        match event {
            Event::MonthStart { month } => {
                let stats = self.region.stats();
                des::Response::events(vec![
                    (
                        current_t,
                        Event::BidsRequested {
                            month: *month,
                            price_index: stats.sale().price_index(),
                            rent_index: stats.rental().price_index(),
                        },
                    ),
                    (current_t + TICKS_PER_MONTH - 1, Event::ClearMarkets { month: *month }),
                ])
            }

            Event::OfferSubmitted {
                month,
                household,
                market,
                dwelling,
                price,
            } => {
                self.on_offer(*month, *household, *market, *dwelling, *price);
                des::Response::new()
            }

            Event::OfferWithdrawn {
                household,
                market,
                dwelling,
                ..
            } => {
                self.on_withdrawal(*household, *market, *dwelling);
                des::Response::new()
            }

            Event::TenancyEnded {
                month,
                household,
                dwelling,
            } => {
                self.on_tenancy_ended(*month, *household, *dwelling);
                des::Response::new()
            }

            Event::BidSubmitted { market, bid, .. } => {
                self.region.bid(*market, *bid);
                des::Response::new()
            }

            Event::ClearMarkets { month } => self.on_clear(current_t, *month),

            _ => des::Response::new(),
        }
    }
}
