use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::HouseholdBehaviour;
use crate::market::MarketKind;
use crate::record::Bid;
use crate::simulation::{Event, Stats};
use crate::transaction::Transaction;
use crate::{DwellingId, HouseholdId, MONTHS_IN_YEAR};

/// Where a household lives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Tenure {
    Owner(DwellingId),
    Renter { dwelling: DwellingId, rent: f64 },
    Homeless,
}

impl Tenure {
    pub fn home(&self) -> Option<DwellingId> {
        match self {
            Tenure::Owner(dwelling) | Tenure::Renter { dwelling, .. } => Some(*dwelling),
            Tenure::Homeless => None,
        }
    }
}

/// A dwelling the household owns, its home included.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Holding {
    pub quality: usize,
    /// Monthly rent while let
    pub rent: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Listing {
    market: MarketKind,
    price: f64,
    months: usize,
}

/// Pricing information shared by every household of a run.
#[derive(Debug, Clone)]
pub struct PriceReference {
    /// Reference sale price per quality band
    pub sale: Vec<f64>,
    /// Reference monthly rent per quality band
    pub rent: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HouseholdStats {
    pub household: HouseholdId,
    pub investor: bool,
    pub tenure: Tenure,
    pub monthly_income: f64,
    pub savings: f64,
    pub dwellings_owned: usize,
    pub dwellings_let: usize,
    pub bids_submitted: usize,
    pub offers_submitted: usize,
    pub purchases: usize,
    pub sales: usize,
    pub tenancies: usize,
    pub evictions: usize,
}

/// Zero-intelligence household.
///
/// Each month it saves part of its income, may put a dwelling up for sale,
/// lowers the asking price of listings that did not sell, and bids for a home
/// (to rent if it has none, to buy with a small probability). Investors also
/// bid for buy-to-let purchases. Prices are drawn around simple budget rules.
pub struct Household {
    id: HouseholdId,
    behaviour: HouseholdBehaviour,
    prices: Arc<PriceReference>,
    tenancy_end_probability: f64,
    investor: bool,
    monthly_income: f64,
    savings: f64,
    tenure: Tenure,
    portfolio: BTreeMap<DwellingId, Holding>,
    listings: BTreeMap<DwellingId, Listing>,
    rng: StdRng,
    stats: HouseholdStats,
}

impl Household {
    pub fn new(
        id: HouseholdId,
        behaviour: HouseholdBehaviour,
        prices: Arc<PriceReference>,
        monthly_income: f64,
        investor: bool,
        tenancy_length_months: f64,
        seed: u64,
    ) -> Self {
        let savings = monthly_income * behaviour.initial_savings_months;
        Household {
            id,
            stats: HouseholdStats {
                household: id,
                investor,
                tenure: Tenure::Homeless,
                monthly_income,
                savings,
                dwellings_owned: 0,
                dwellings_let: 0,
                bids_submitted: 0,
                offers_submitted: 0,
                purchases: 0,
                sales: 0,
                tenancies: 0,
                evictions: 0,
            },
            behaviour,
            prices,
            tenancy_end_probability: 1.0 / tenancy_length_months.max(1.0),
            investor,
            monthly_income,
            savings,
            tenure: Tenure::Homeless,
            portfolio: BTreeMap::new(),
            listings: BTreeMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn id(&self) -> HouseholdId {
        self.id
    }

    pub fn tenure(&self) -> Tenure {
        self.tenure
    }

    pub fn savings(&self) -> f64 {
        self.savings
    }

    pub fn portfolio(&self) -> &BTreeMap<DwellingId, Holding> {
        &self.portfolio
    }

    /// Initial endowment: the household owns and lives in `dwelling`.
    pub fn endow_home(&mut self, dwelling: DwellingId, quality: usize) {
        self.portfolio.insert(dwelling, Holding { quality, rent: None });
        self.tenure = Tenure::Owner(dwelling);
    }

    /// Initial endowment: a buy-to-let dwelling, let at `rent` if given.
    pub fn endow_rental(&mut self, dwelling: DwellingId, quality: usize, rent: Option<f64>) {
        self.portfolio.insert(dwelling, Holding { quality, rent });
    }

    /// Initial endowment: the household rents `dwelling`.
    pub fn endow_tenancy(&mut self, dwelling: DwellingId, rent: f64) {
        self.tenure = Tenure::Renter { dwelling, rent };
    }

    fn noisy(&mut self, value: f64) -> f64 {
        let noise = self.behaviour.bid_noise;
        value * (1.0 + noise * (2.0 * self.rng.random::<f64>() - 1.0))
    }

    fn chance(&mut self, probability: f64) -> bool {
        self.rng.random::<f64>() < probability
    }

    fn expected_price(&self, quality: usize, price_index: f64) -> Option<f64> {
        self.prices.sale.get(quality).map(|price| price * price_index)
    }

    fn expected_rent(&self, quality: usize, rent_index: f64) -> Option<f64> {
        self.prices.rent.get(quality).map(|rent| rent * rent_index)
    }

    fn bid(&mut self, month: usize, market: MarketKind, bid: Bid) -> Event {
        self.stats.bids_submitted += 1;
        Event::BidSubmitted { month, market, bid }
    }

    fn offer(
        &mut self,
        month: usize,
        market: MarketKind,
        dwelling: DwellingId,
        price: f64,
    ) -> Event {
        self.stats.offers_submitted += 1;
        Event::OfferSubmitted {
            month,
            household: self.id,
            market,
            dwelling,
            price,
        }
    }

    /// Reprice listings that did not sell and withdraw stale ones.
    fn manage_listings(&mut self, month: usize, events: &mut Vec<Event>) {
        let mut stale = Vec::new();
        let mut repriced = Vec::new();
        for (dwelling, listing) in self.listings.iter_mut() {
            listing.months += 1;
            if listing.months > self.behaviour.max_months_listed {
                stale.push((*dwelling, listing.market));
            } else if listing.months > 1 {
                listing.price *= self.behaviour.price_reduction;
                repriced.push((*dwelling, listing.market, listing.price));
            }
        }
        for (dwelling, market) in stale {
            self.listings.remove(&dwelling);
            events.push(Event::OfferWithdrawn {
                month,
                household: self.id,
                market,
                dwelling,
            });
        }
        for (dwelling, market, price) in repriced {
            let event = self.offer(month, market, dwelling, price);
            events.push(event);
        }
    }

    fn consider_selling(&mut self, month: usize, price_index: f64, events: &mut Vec<Event>) {
        let candidates: Vec<(DwellingId, usize)> = self
            .portfolio
            .iter()
            .filter(|(dwelling, holding)| {
                !self.listings.contains_key(dwelling)
                    && (holding.rent.is_none() || self.investor)
            })
            .map(|(dwelling, holding)| (*dwelling, holding.quality))
            .collect();
        for (dwelling, quality) in candidates {
            if !self.chance(self.behaviour.sale_probability) {
                continue;
            }
            let Some(expected) = self.expected_price(quality, price_index) else {
                continue;
            };
            let price = expected * self.behaviour.list_markup;
            self.listings.insert(
                dwelling,
                Listing {
                    market: MarketKind::Sale,
                    price,
                    months: 0,
                },
            );
            let event = self.offer(month, MarketKind::Sale, dwelling, price);
            events.push(event);
        }
    }

    fn consider_buying(&mut self, month: usize, events: &mut Vec<Event>) {
        if matches!(self.tenure, Tenure::Owner(_)) {
            return;
        }
        if self.chance(self.behaviour.purchase_probability) {
            let by_income = self.behaviour.income_multiple * self.monthly_income * MONTHS_IN_YEAR;
            let by_deposit = self.savings / self.behaviour.deposit_fraction.max(f64::EPSILON);
            let budget = self.noisy(by_income.min(by_deposit));
            if budget > 0.0 {
                let event = self.bid(month, MarketKind::Sale, Bid::owner_occupier(self.id, budget));
                events.push(event);
            }
        }
        if self.tenure == Tenure::Homeless {
            let rent = self.noisy(self.behaviour.rent_income_fraction * self.monthly_income);
            if rent > 0.0 {
                let event = self.bid(month, MarketKind::Rental, Bid::owner_occupier(self.id, rent));
                events.push(event);
            }
        }
    }

    fn consider_investing(&mut self, month: usize, events: &mut Vec<Event>) {
        if !self.investor
            || self.savings <= 0.0
            || !self.chance(self.behaviour.btl_bid_probability)
        {
            return;
        }
        let max_price = self.noisy(self.savings * self.behaviour.btl_leverage);
        let bid = Bid::investor(self.id, max_price, self.savings);
        let event = self.bid(month, MarketKind::Sale, bid);
        events.push(event);
    }

    fn consider_moving_out(&mut self, month: usize, events: &mut Vec<Event>) {
        let Tenure::Renter { dwelling, .. } = self.tenure else {
            return;
        };
        if self.chance(self.tenancy_end_probability) {
            self.tenure = Tenure::Homeless;
            events.push(Event::TenancyEnded {
                month,
                household: self.id,
                dwelling,
            });
        }
    }

    fn on_bids_requested(&mut self, month: usize, price_index: f64, rent_index: f64) -> Vec<Event> {
        self.savings += self.monthly_income * self.behaviour.saving_rate;
        self.savings += self
            .portfolio
            .values()
            .filter_map(|holding| holding.rent)
            .sum::<f64>();

        let mut events = Vec::new();
        self.manage_listings(month, &mut events);
        self.consider_selling(month, price_index, &mut events);
        self.consider_moving_out(month, &mut events);
        self.consider_buying(month, &mut events);
        self.consider_investing(month, &mut events);

        // Vacant buy-to-let dwellings are offered for rent
        let vacant: Vec<(DwellingId, usize)> = self
            .portfolio
            .iter()
            .filter(|(dwelling, holding)| {
                holding.rent.is_none()
                    && Some(**dwelling) != self.tenure.home()
                    && !self.listings.contains_key(dwelling)
            })
            .map(|(dwelling, holding)| (*dwelling, holding.quality))
            .collect();
        for (dwelling, quality) in vacant {
            if let Some(rent) = self.expected_rent(quality, rent_index) {
                self.listings.insert(
                    dwelling,
                    Listing {
                        market: MarketKind::Rental,
                        price: rent,
                        months: 0,
                    },
                );
                let event = self.offer(month, MarketKind::Rental, dwelling, rent);
                events.push(event);
            }
        }
        events
    }

    fn on_sale_completed(&mut self, sale: &Transaction) {
        if sale.buyer == self.id {
            self.stats.purchases += 1;
            if sale.investor_bid {
                self.savings -= sale.price / self.behaviour.btl_leverage.max(1.0);
            } else {
                self.savings -= sale.price * self.behaviour.deposit_fraction;
                self.tenure = Tenure::Owner(sale.dwelling);
            }
            self.portfolio.insert(
                sale.dwelling,
                Holding {
                    quality: sale.quality,
                    rent: None,
                },
            );
        }
        if sale.seller == Some(self.id) {
            self.stats.sales += 1;
            self.savings += sale.price * self.behaviour.deposit_fraction;
            self.portfolio.remove(&sale.dwelling);
            self.listings.remove(&sale.dwelling);
            if self.tenure == Tenure::Owner(sale.dwelling) {
                self.tenure = Tenure::Homeless;
            }
        }
        self.on_moves(sale);
    }

    fn on_rental_completed(&mut self, letting: &Transaction) {
        if letting.buyer == self.id {
            self.stats.tenancies += 1;
            self.tenure = Tenure::Renter {
                dwelling: letting.dwelling,
                rent: letting.price,
            };
        }
        if letting.seller == Some(self.id) {
            if let Some(holding) = self.portfolio.get_mut(&letting.dwelling) {
                holding.rent = Some(letting.price);
            }
            self.listings.remove(&letting.dwelling);
        }
        self.on_moves(letting);
    }

    /// Moves caused by someone else's transaction.
    fn on_moves(&mut self, transaction: &Transaction) {
        if transaction.displaced == Some(self.id) {
            self.stats.evictions += 1;
            self.tenure = Tenure::Homeless;
        }
        if let Some(vacated) = transaction.vacated {
            self.vacate(vacated);
        }
    }

    fn vacate(&mut self, dwelling: DwellingId) {
        if let Some(holding) = self.portfolio.get_mut(&dwelling) {
            holding.rent = None;
        }
    }
}

impl des::Agent<Event, Stats> for Household {
    fn stats(&self) -> Stats {
        let mut stats = self.stats.clone();
        stats.tenure = self.tenure;
        stats.savings = self.savings;
        stats.dwellings_owned = self.portfolio.len();
        stats.dwellings_let = self.portfolio.values().filter(|h| h.rent.is_some()).count();
        Stats::Household(stats)
    }

    fn act(&mut self, current_t: usize, event: &Event) -> des::Response<Event, Stats> {
        match event {
            Event::BidsRequested {
                month,
                price_index,
                rent_index,
            } => {
                let events = self
                    .on_bids_requested(*month, *price_index, *rent_index)
                    .into_iter()
                    .map(|event| (current_t, event))
                    .collect();
                des::Response::events(events)
            }
            Event::SaleCompleted(sale) => {
                self.on_sale_completed(sale);
                des::Response::new()
            }
            Event::RentalCompleted(letting) => {
                self.on_rental_completed(letting);
                des::Response::new()
            }
            Event::TenancyEnded { dwelling, household, .. } if *household != self.id => {
                self.vacate(*dwelling);
                des::Response::new()
            }
            _ => des::Response::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OfferId;
    use des::Agent;

    fn prices() -> Arc<PriceReference> {
        Arc::new(PriceReference {
            sale: vec![100_000.0, 200_000.0],
            rent: vec![500.0, 900.0],
        })
    }

    fn household(investor: bool) -> Household {
        let behaviour = HouseholdBehaviour {
            bid_noise: 0.0,
            sale_probability: 0.0,
            ..HouseholdBehaviour::default()
        };
        Household::new(HouseholdId(3), behaviour, prices(), 3_000.0, investor, 18.0, 1)
    }

    fn sale(
        buyer: usize,
        seller: Option<usize>,
        dwelling: usize,
        investor_bid: bool,
    ) -> Transaction {
        Transaction {
            kind: MarketKind::Sale,
            month: 2,
            offer: OfferId(0),
            dwelling: DwellingId(dwelling),
            quality: 1,
            buyer: HouseholdId(buyer),
            seller: seller.map(HouseholdId),
            price: 150_000.0,
            list_price: 150_000.0,
            listed_at: 0,
            investor_bid,
            investor_offer: false,
            competing_bids: 1,
            vacated: None,
            displaced: None,
        }
    }

    fn requested(household: &mut Household, month: usize) -> Vec<Event> {
        household
            .act(
                month * 2,
                &Event::BidsRequested {
                    month,
                    price_index: 1.0,
                    rent_index: 1.0,
                },
            )
            .events
            .into_iter()
            .map(|(_, event)| event)
            .collect()
    }

    #[test]
    fn homeless_household_bids_for_a_rental() {
        let mut household = household(false);
        let events = requested(&mut household, 0);
        let rental_bid = events.iter().find_map(|event| match event {
            Event::BidSubmitted {
                market: MarketKind::Rental,
                bid,
                ..
            } => Some(*bid),
            _ => None,
        });
        let bid = rental_bid.unwrap();
        assert_eq!(bid.bidder, HouseholdId(3));
        assert!((bid.max_price - 0.33 * 3_000.0).abs() < 1e-9);
    }

    #[test]
    fn purchase_makes_the_buyer_an_owner() {
        let mut household = household(false);
        let before = household.savings();
        household.act(3, &Event::SaleCompleted(sale(3, Some(9), 4, false)));

        assert_eq!(household.tenure(), Tenure::Owner(DwellingId(4)));
        assert!(household.portfolio().contains_key(&DwellingId(4)));
        assert!((before - household.savings() - 15_000.0).abs() < 1e-6);
    }

    #[test]
    fn owner_does_not_bid() {
        let mut household = household(false);
        household.endow_home(DwellingId(1), 0);
        let events = requested(&mut household, 0);
        assert!(!events
            .iter()
            .any(|event| matches!(event, Event::BidSubmitted { .. })));
    }

    #[test]
    fn seller_becomes_homeless() {
        let mut household = household(false);
        household.endow_home(DwellingId(1), 1);
        household.act(3, &Event::SaleCompleted(sale(8, Some(3), 1, false)));

        assert_eq!(household.tenure(), Tenure::Homeless);
        assert!(household.portfolio().is_empty());
    }

    #[test]
    fn investor_purchase_is_offered_for_rent() {
        let mut household = household(true);
        household.endow_home(DwellingId(1), 0);
        household.act(3, &Event::SaleCompleted(sale(3, None, 6, true)));
        assert_eq!(household.tenure(), Tenure::Owner(DwellingId(1)));

        let events = requested(&mut household, 2);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::OfferSubmitted {
                market: MarketKind::Rental,
                dwelling: DwellingId(6),
                price,
                ..
            } if (*price - 900.0).abs() < 1e-9
        )));
    }

    #[test]
    fn letting_records_rent_and_stops_relisting() {
        let mut household = household(true);
        household.endow_rental(DwellingId(6), 1, None);
        let letting = Transaction {
            kind: MarketKind::Rental,
            seller: Some(HouseholdId(3)),
            buyer: HouseholdId(11),
            price: 880.0,
            ..sale(11, Some(3), 6, false)
        };
        household.act(3, &Event::RentalCompleted(letting));

        assert_eq!(household.portfolio()[&DwellingId(6)].rent, Some(880.0));
        let events = requested(&mut household, 2);
        assert!(!events.iter().any(|event| matches!(
            event,
            Event::OfferSubmitted {
                market: MarketKind::Rental,
                ..
            }
        )));
    }

    #[test]
    fn evicted_tenant_is_homeless() {
        let mut household = household(false);
        household.endow_tenancy(DwellingId(2), 700.0);
        let eviction = Transaction {
            displaced: Some(HouseholdId(3)),
            ..sale(8, Some(1), 2, false)
        };
        household.act(3, &Event::SaleCompleted(eviction));
        assert_eq!(household.tenure(), Tenure::Homeless);
    }

    #[test]
    fn unsold_listing_is_repriced_then_withdrawn() {
        let behaviour = HouseholdBehaviour {
            sale_probability: 1.0,
            max_months_listed: 2,
            price_reduction: 0.9,
            ..HouseholdBehaviour::default()
        };
        let mut household =
            Household::new(HouseholdId(3), behaviour, prices(), 3_000.0, false, 18.0, 1);
        household.endow_home(DwellingId(1), 0);

        let listed = requested(&mut household, 0);
        assert!(listed.iter().any(|event| matches!(
            event,
            Event::OfferSubmitted { market: MarketKind::Sale, price, .. }
                if (*price - 105_000.0).abs() < 1e-6
        )));

        requested(&mut household, 1);
        let repriced = requested(&mut household, 2);
        assert!(repriced.iter().any(|event| matches!(
            event,
            Event::OfferSubmitted { market: MarketKind::Sale, price, .. }
                if (*price - 94_500.0).abs() < 1e-6
        )));

        let withdrawn = requested(&mut household, 3);
        assert!(withdrawn
            .iter()
            .any(|event| matches!(event, Event::OfferWithdrawn { dwelling: DwellingId(1), .. })));
    }
}
