//! Oversubscription: what happens when several bids land on one offer.
//!
//! The sale price is first bid up from the list price by a random number of
//! `bid_up_factor` steps, then one of the bids able to pay it is picked.

use rand::Rng;
use rand_distr::{Distribution, Geometric};

use crate::config::MarketConfig;
use crate::record::Bid;

/// Cap on the enough-bids exponent
const MAX_ENOUGH_BIDS: u32 = 4;
/// Below this the geometric sampler loses precision in `1 - p`
const MIN_STEP_PROBABILITY: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BidUp {
    pub factor: f64,
    pub months_under_offer: f64,
    pub target_population: usize,
}

impl BidUp {
    pub fn from_config(config: &MarketConfig) -> Self {
        BidUp {
            factor: config.bid_up_factor,
            months_under_offer: config.months_under_offer,
            target_population: config.target_population,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.factor > 1.0
    }

    /// `min(4, round(0.5 + n * 10000 / target_population))`, rounding by truncation.
    pub fn enough_bids(&self, n_bids: usize) -> u32 {
        let scaled = 0.5 + n_bids as f64 * 10_000.0 / self.target_population.max(1) as f64;
        (scaled as u32).min(MAX_ENOUGH_BIDS)
    }

    /// Success probability of the geometric number of bid-up steps.
    pub fn step_probability(&self, n_bids: usize) -> f64 {
        let p = (-(self.enough_bids(n_bids) as f64) * self.months_under_offer).exp();
        p.clamp(MIN_STEP_PROBABILITY, 1.0)
    }

    /// Draw the price the offer is pushed to by `n_bids` competing bids.
    pub fn sale_price<R: Rng + ?Sized>(&self, list_price: f64, n_bids: usize, rng: &mut R) -> f64 {
        if !self.is_enabled() {
            return list_price;
        }
        let steps = Geometric::new(self.step_probability(n_bids))
            .map(|geometric| geometric.sample(rng))
            .unwrap_or(0);
        list_price * self.factor.powf(steps as f64)
    }
}

/// Which matched bid won an oversubscribed offer, and at what price.
///
/// Indices refer to the bid slice after [`select_winner`] sorted it by
/// ascending price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub winner: usize,
    pub sale_price: f64,
    /// Bids at `[0, below)` offered less than the bid-up price
    pub below: usize,
}

impl Resolution {
    /// Losing bids that could have paid the bid-up price.
    pub fn is_qualifying_loser(&self, index: usize) -> bool {
        index >= self.below && index != self.winner
    }

    /// True when no bid reached the bid-up price and the highest bid set the price.
    pub fn fell_back(&self) -> bool {
        self.winner < self.below
    }
}

/// Pick the winner among `bids` (at least one) for a bid-up `sale_price`.
///
/// Bids are sorted ascending by price, stable for equal prices. Every bid at or
/// above the sale price qualifies and one is drawn uniformly; with a single
/// qualifier there is no draw. If none qualifies the highest bid wins and the
/// sale price drops to that bid, so an oversubscribed offer always sells.
pub fn select_winner<R: Rng + ?Sized>(
    bids: &mut [Bid],
    sale_price: f64,
    rng: &mut R,
) -> Resolution {
    debug_assert!(!bids.is_empty(), "select_winner needs at least one bid");
    bids.sort_by(|a, b| a.max_price.total_cmp(&b.max_price));

    let below = bids.partition_point(|bid| bid.max_price < sale_price);
    let qualifying = bids.len() - below;
    match qualifying {
        0 => {
            let winner = bids.len().saturating_sub(1);
            Resolution {
                winner,
                sale_price: bids.get(winner).map_or(sale_price, |bid| bid.max_price),
                below,
            }
        }
        1 => Resolution {
            winner: below,
            sale_price,
            below,
        },
        _ => Resolution {
            winner: below + rng.random_range(0..qualifying),
            sale_price,
            below,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HouseholdId;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn bids(prices: &[f64]) -> Vec<Bid> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Bid::owner_occupier(HouseholdId(i), p))
            .collect()
    }

    #[test]
    fn enough_bids_is_capped_at_four() {
        let bid_up = BidUp::from_config(&MarketConfig::baseline());
        // target population 10_000: 0.5 + n
        assert_eq!(bid_up.enough_bids(0), 0);
        assert_eq!(bid_up.enough_bids(2), 2);
        assert_eq!(bid_up.enough_bids(3), 3);
        assert_eq!(bid_up.enough_bids(9), 4);
    }

    #[test]
    fn enough_bids_scales_with_target_population() {
        let bid_up = BidUp {
            factor: 1.01,
            months_under_offer: 0.25,
            target_population: 40_000,
        };
        // 0.5 + 2 * 0.25 = 1.0
        assert_eq!(bid_up.enough_bids(2), 1);
        // 0.5 + 1 * 0.25 = 0.75
        assert_eq!(bid_up.enough_bids(1), 0);
        assert_relative_eq!(bid_up.step_probability(2), (-0.25f64).exp());
    }

    #[test]
    fn disabled_bid_up_keeps_list_price() {
        let bid_up = BidUp::from_config(&MarketConfig::without_bid_up());
        let mut rng = StdRng::seed_from_u64(1);
        for n in 2..10 {
            assert_eq!(bid_up.sale_price(100.0, n, &mut rng), 100.0);
        }
    }

    #[test]
    fn bid_up_price_is_a_power_of_the_factor() {
        let bid_up = BidUp::from_config(&MarketConfig::baseline());
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let price = bid_up.sale_price(100.0, 3, &mut rng);
            assert!(price >= 100.0);
            let steps = (price / 100.0).ln() / bid_up.factor.ln();
            assert_relative_eq!(steps, steps.round(), epsilon = 1e-6);
        }
    }

    #[test]
    fn list_price_with_several_qualifiers_draws_among_all() {
        // bid-up disabled: sale price stays at the list price of 100
        let mut rng = StdRng::seed_from_u64(11);
        let mut winners = std::collections::HashSet::new();
        for _ in 0..300 {
            let mut matched = bids(&[150.0, 100.0, 120.0]);
            let resolution = select_winner(&mut matched, 100.0, &mut rng);
            assert_eq!(resolution.sale_price, 100.0);
            assert_eq!(resolution.below, 0);
            assert!(!resolution.fell_back());
            winners.insert(matched[resolution.winner].max_price as u64);
        }
        assert_eq!(winners.len(), 3);
    }

    #[test]
    fn single_qualifier_wins_deterministically() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut matched = bids(&[150.0, 100.0, 120.0]);
        let resolution = select_winner(&mut matched, 130.0, &mut rng);
        assert_eq!(matched[resolution.winner].max_price, 150.0);
        assert_eq!(resolution.sale_price, 130.0);
        assert_eq!(resolution.below, 2);
        assert!(!resolution.is_qualifying_loser(0));
        assert!(!resolution.is_qualifying_loser(2));
    }

    #[test]
    fn bid_up_beyond_every_bid_falls_back_to_highest() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut matched = bids(&[100.0, 150.0, 120.0]);
        let resolution = select_winner(&mut matched, 160.0, &mut rng);
        assert!(resolution.fell_back());
        assert_eq!(matched[resolution.winner].max_price, 150.0);
        assert_eq!(resolution.sale_price, 150.0);
    }

    #[test]
    fn sale_price_never_exceeds_winning_bid() {
        let bid_up = BidUp {
            factor: 1.05,
            months_under_offer: 0.0,
            target_population: 10_000,
        };
        let mut rng = StdRng::seed_from_u64(99);
        for round in 0..500 {
            let mut matched = bids(&[100.0, 100.0 + round as f64 % 7.0, 104.0, 111.0]);
            let price = bid_up.sale_price(100.0, matched.len(), &mut rng);
            let resolution = select_winner(&mut matched, price, &mut rng);
            assert!(resolution.sale_price <= matched[resolution.winner].max_price);
            assert!(resolution.sale_price >= 100.0);
        }
    }

    #[test]
    fn equal_prices_keep_arrival_order() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut matched = bids(&[120.0, 100.0, 120.0]);
        select_winner(&mut matched, 130.0, &mut rng);
        assert_eq!(matched[1].bidder, HouseholdId(0));
        assert_eq!(matched[2].bidder, HouseholdId(2));
    }
}
