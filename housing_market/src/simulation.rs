//! Month-by-month simulation on the `des` event loop.
//!
//! One [`RegionCoordinator`] and a population of zero-intelligence
//! [`Household`] agents exchange events. Every month takes two ticks:
//!
//! ```text
//! t = 2m     MonthStart -> BidsRequested -> OfferSubmitted / BidSubmitted / ...
//! t = 2m + 1 ClearMarkets -> SaleCompleted / RentalCompleted -> MarketCleared -> MonthEnd
//! ```

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, LogNormal};
use tracing::info;

use crate::config::SimulationConfig;
use crate::coordinator::{RegionCoordinator, RegionStatsSnapshot};
use crate::error::SimulationError;
use crate::household::{Household, HouseholdStats, PriceReference};
use crate::market::MarketKind;
use crate::record::Bid;
use crate::region::Region;
use crate::stats::MonthlySummary;
use crate::transaction::Transaction;
use crate::{DwellingId, HouseholdId, MONTHS_IN_YEAR};

pub const TICKS_PER_MONTH: usize = 2;

#[derive(Debug, Clone)]
pub enum Event {
    MonthStart {
        month: usize,
    },

    /// Coordinator asks every household for this month's offers and bids
    BidsRequested {
        month: usize,
        price_index: f64,
        rent_index: f64,
    },

    BidSubmitted {
        month: usize,
        market: MarketKind,
        bid: Bid,
    },

    /// List a dwelling, or reprice it if already listed
    OfferSubmitted {
        month: usize,
        household: HouseholdId,
        market: MarketKind,
        dwelling: DwellingId,
        price: f64,
    },

    OfferWithdrawn {
        month: usize,
        household: HouseholdId,
        market: MarketKind,
        dwelling: DwellingId,
    },

    /// A tenant leaves; the dwelling goes back on the rental market
    TenancyEnded {
        month: usize,
        household: HouseholdId,
        dwelling: DwellingId,
    },

    ClearMarkets {
        month: usize,
    },

    SaleCompleted(Transaction),

    RentalCompleted(Transaction),

    MarketCleared {
        month: usize,
        summary: MonthlySummary,
    },

    MonthEnd {
        month: usize,
    },
}

#[derive(Debug, Clone)]
pub enum Stats {
    Region(RegionStatsSnapshot),
    Household(HouseholdStats),
}

/// A region and its households, ready to run.
pub struct Simulation {
    event_loop: des::EventLoop<Event, Stats>,
    months: usize,
}

impl Simulation {
    pub fn new(config: &SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        let (region, households) = endow(config)?;
        let months = config.simulation.months;
        info!(
            households = households.len(),
            dwellings = region.dwellings().len(),
            months,
            seed = config.simulation.seed,
            "simulation built"
        );

        let mut agents: Vec<Box<dyn des::Agent<Event, Stats>>> =
            Vec::with_capacity(households.len() + 1);
        agents.push(Box::new(RegionCoordinator::new(
            region,
            months,
            config.output.write_transactions,
        )));
        for household in households {
            agents.push(Box::new(household));
        }

        let events = if months > 0 {
            vec![(0, Event::MonthStart { month: 0 })]
        } else {
            Vec::new()
        };
        Ok(Simulation {
            event_loop: des::EventLoop::new(events, agents),
            months,
        })
    }

    pub fn run(&mut self) {
        self.event_loop.run(self.months * TICKS_PER_MONTH);
    }

    pub fn stats(&self) -> Vec<Stats> {
        self.event_loop.stats()
    }
}

/// Build the dwelling stock and the households, and hand out the initial
/// tenures: the highest earners own their homes, investors own the rest of the
/// stock and let it to the remaining households while it lasts.
fn endow(config: &SimulationConfig) -> Result<(Region, Vec<Household>), SimulationError> {
    let sim = &config.simulation;
    let behaviour = &config.households;
    let bands = config.market.n_quality_bands;
    let mut rng = StdRng::seed_from_u64(sim.seed);
    let mut region = Region::new(0, config, sim.seed);
    region.set_population(sim.households);

    let mut stock = Vec::with_capacity(sim.dwellings);
    for index in 0..sim.dwellings {
        let quality = index * bands / sim.dwellings.max(1);
        stock.push((region.dwellings_mut().build(quality)?, quality));
    }

    let income = LogNormal::new(behaviour.monthly_income_median.ln(), behaviour.income_log_sd)
        .map_err(|err| SimulationError::Income(err.to_string()))?;
    let incomes: Vec<f64> = (0..sim.households).map(|_| income.sample(&mut rng)).collect();

    let reference_sale = config.reference_prices();
    let reference_rent = reference_sale
        .iter()
        .map(|price| price * config.market.initial_rent_gross_yield / MONTHS_IN_YEAR)
        .collect();
    let prices = Arc::new(PriceReference {
        sale: reference_sale,
        rent: reference_rent,
    });

    // Richest first
    let mut by_income: Vec<usize> = (0..sim.households).collect();
    by_income.sort_by(|&a, &b| incomes[b].total_cmp(&incomes[a]));
    let n_owners = ((sim.households as f64 * sim.ownership_rate).round() as usize)
        .min(sim.households)
        .min(stock.len());
    let n_investors = ((sim.households as f64 * sim.investor_share).round() as usize).min(n_owners);
    let mut investors: Vec<usize> = by_income[..n_owners].to_vec();
    investors.shuffle(&mut rng);
    investors.truncate(n_investors);

    let mut households: Vec<Household> = (0..sim.households)
        .map(|index| {
            Household::new(
                HouseholdId(index),
                behaviour.clone(),
                Arc::clone(&prices),
                incomes[index],
                investors.contains(&index),
                config.market.tenancy_length_months,
                sim.seed.wrapping_mul(1000).wrapping_add(index as u64),
            )
        })
        .collect();

    // Best dwellings to the best-paid owners
    let mut dwellings = stock.into_iter().rev();
    for &index in &by_income[..n_owners] {
        let Some((dwelling, quality)) = dwellings.next() else {
            break;
        };
        let owner = HouseholdId(index);
        region.dwellings_mut().assign_owner(dwelling, owner)?;
        region.dwellings_mut().move_in(owner, dwelling)?;
        households[index].endow_home(dwelling, quality);
    }

    let mut renters = by_income[n_owners..].iter().copied();
    for (slot, (dwelling, quality)) in dwellings.enumerate() {
        let Some(&landlord) = investors.get(slot % investors.len().max(1)) else {
            // No investors: the remaining stock starts out unowned and for sale
            if let Some(price) = prices.sale.get(quality) {
                region.offer(MarketKind::Sale, dwelling, *price, 0)?;
            }
            continue;
        };
        region.dwellings_mut().assign_owner(dwelling, HouseholdId(landlord))?;
        let rent = prices.rent.get(quality).copied();
        match (renters.next(), rent) {
            (Some(tenant), Some(rent)) => {
                region.dwellings_mut().move_in(HouseholdId(tenant), dwelling)?;
                households[tenant].endow_tenancy(dwelling, rent);
                households[landlord].endow_rental(dwelling, quality, Some(rent));
            }
            (_, rent) => {
                households[landlord].endow_rental(dwelling, quality, None);
                if let Some(rent) = rent {
                    region.offer(MarketKind::Rental, dwelling, rent, 0)?;
                }
            }
        }
    }

    Ok((region, households))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MarketConfig, SimulationSettings};
    use crate::household::Tenure;

    fn small_config(households: usize, dwellings: usize) -> SimulationConfig {
        SimulationConfig {
            market: MarketConfig {
                n_quality_bands: 10,
                ..MarketConfig::baseline()
            },
            simulation: SimulationSettings {
                months: 6,
                households,
                dwellings,
                ownership_rate: 0.5,
                investor_share: 0.1,
                ..SimulationSettings::default()
            },
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn endowment_houses_owners_and_tenants() {
        let config = small_config(40, 44);
        let (region, households) = endow(&config).unwrap();

        let owners = households
            .iter()
            .filter(|h| matches!(h.tenure(), Tenure::Owner(_)))
            .count();
        let renters = households
            .iter()
            .filter(|h| matches!(h.tenure(), Tenure::Renter { .. }))
            .count();
        assert_eq!(owners, 20);
        assert_eq!(renters, 20);
        assert_eq!(region.dwellings().len(), 44);
        // 4 dwellings left over after every household is housed
        assert_eq!(region.market(MarketKind::Rental).n_offers(), 4);
        for household in &households {
            if let Some(home) = household.tenure().home() {
                assert_eq!(region.dwellings().residence_of(household.id()), Some(home));
            }
        }
    }

    #[test]
    fn without_investors_spare_stock_is_for_sale() {
        let mut config = small_config(10, 12);
        config.simulation.investor_share = 0.0;
        let (region, households) = endow(&config).unwrap();

        assert!(households.iter().all(|h| h.portfolio().len() <= 1));
        assert_eq!(region.market(MarketKind::Sale).n_offers(), 7);
    }

    #[test]
    fn run_produces_one_report_per_month() {
        let config = small_config(60, 66);
        let mut simulation = Simulation::new(&config).unwrap();
        simulation.run();

        let region = simulation
            .stats()
            .into_iter()
            .find_map(|stats| match stats {
                Stats::Region(region) => Some(region),
                Stats::Household(_) => None,
            })
            .unwrap();
        assert_eq!(region.months.len(), 6);
        assert_eq!(region.rejected_requests, 0);
        for (month, report) in region.months.iter().enumerate() {
            assert_eq!(report.month, month);
            assert_eq!(report.sale.bids_accounted(), report.sale.bids_submitted);
            assert_eq!(report.rental.bids_accounted(), report.rental.bids_submitted);
        }
    }

    #[test]
    fn zero_months_runs_nothing() {
        let mut config = small_config(5, 5);
        config.simulation.months = 0;
        let mut simulation = Simulation::new(&config).unwrap();
        simulation.run();
        let Some(Stats::Region(region)) = simulation.stats().into_iter().next() else {
            panic!("coordinator is the first agent");
        };
        assert!(region.months.is_empty());
    }
}
