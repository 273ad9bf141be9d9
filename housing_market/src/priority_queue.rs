//! Two-key priority structure over offers.
//!
//! Offers are partitioned by quality band. Inside a band they are kept ordered
//! by (price, listing month, offer id), so the first entry of a band is both its
//! cheapest and, among equally cheap offers, its oldest. A query for the best
//! offer at or below a price ceiling therefore only has to look at the head of
//! each band: O(k) in the number of bands, independent of how many offers are
//! listed.
//!
//! Mutation and querying are two separate phases. Insertions land in a pending
//! buffer and only become visible to [`PriorityQueue2D::best_for`] after
//! [`PriorityQueue2D::prepare`]. Removals take effect immediately, which is what
//! lets the clearing loop excise sold offers between rounds without another
//! prepare.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::OfferId;
use crate::error::MarketError;
use crate::record::OfferRecord;

/// How competing offers under a bid's ceiling are ranked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dominance<'a> {
    /// Owner-occupiers: highest quality band, then lowest price.
    PriceQuality,
    /// Investors: highest gross yield `annual_rent_flow[band] / price`, then
    /// lowest price. Bands missing from the slice earn no rent.
    PriceYield { annual_rent_flow: &'a [f64] },
}

/// f64 price with a total order so it can key an ordered set.
#[derive(Debug, Clone, Copy)]
struct PriceKey(f64);

impl PartialEq for PriceKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PriceKey {}

impl Ord for PriceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for PriceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    price: PriceKey,
    listed_at: usize,
    offer: OfferId,
}

impl Slot {
    fn of(record: &OfferRecord) -> Self {
        Slot {
            price: PriceKey(record.price()),
            listed_at: record.listed_at(),
            offer: record.id(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PriorityQueue2D {
    bands: Vec<BTreeSet<Slot>>,
    index: HashMap<OfferId, (usize, Slot)>,
    pending: Vec<(usize, Slot)>,
}

impl PriorityQueue2D {
    pub fn new(n_quality_bands: usize) -> Self {
        PriorityQueue2D {
            bands: vec![BTreeSet::new(); n_quality_bands],
            index: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn n_bands(&self) -> usize {
        self.bands.len()
    }

    /// Queue a record for insertion. It is keyed by its price at this moment,
    /// so the record must be removed before its price changes.
    pub fn insert(&mut self, record: &OfferRecord) -> Result<(), MarketError> {
        let band = record.quality();
        if band >= self.bands.len() {
            return Err(MarketError::QualityOutOfRange {
                quality: band,
                bands: self.bands.len(),
            });
        }
        let duplicate = self.index.contains_key(&record.id());
        debug_assert!(!duplicate, "{} inserted twice", record.id());
        if duplicate {
            return Err(MarketError::DuplicateOffer(record.id()));
        }
        let slot = Slot::of(record);
        self.index.insert(record.id(), (band, slot));
        self.pending.push((band, slot));
        Ok(())
    }

    /// Remove by identity. Returns false if the offer is not indexed here,
    /// which is harmless: a sold offer is dropped from every queue that might
    /// hold it.
    pub fn remove(&mut self, offer: OfferId) -> bool {
        let Some((band, slot)) = self.index.remove(&offer) else {
            return false;
        };
        if !self.bands[band].remove(&slot) {
            self.pending.retain(|(_, pending)| pending.offer != offer);
        }
        true
    }

    pub fn contains(&self, offer: OfferId) -> bool {
        self.index.contains_key(&offer)
    }

    /// Make pending insertions searchable. Must run before each clearing pass.
    pub fn prepare(&mut self) {
        for (band, slot) in self.pending.drain(..) {
            self.bands[band].insert(slot);
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.pending.is_empty()
    }

    /// The dominant offer priced at or below `ceiling`, if any.
    ///
    /// Ties on the ranking key go to the cheaper offer, then the earlier
    /// listing, then the lower offer id.
    pub fn best_for(&self, ceiling: f64, dominance: Dominance<'_>) -> Option<OfferId> {
        debug_assert!(
            self.is_prepared(),
            "best_for called with {} unprepared insertions",
            self.pending.len()
        );
        if !self.is_prepared() {
            warn!(
                pending = self.pending.len(),
                "querying an unprepared queue; pending offers are not visible"
            );
        }

        let heads = self
            .bands
            .iter()
            .enumerate()
            .filter_map(|(band, slots)| slots.first().map(|slot| (band, *slot)))
            .filter(|(_, slot)| slot.price.0 <= ceiling);

        match dominance {
            Dominance::PriceQuality => heads
                .max_by(|(band_a, a), (band_b, b)| band_a.cmp(band_b).then_with(|| b.cmp(a)))
                .map(|(_, slot)| slot.offer),
            Dominance::PriceYield { annual_rent_flow } => {
                let score = |band: usize, slot: &Slot| {
                    annual_rent_flow.get(band).copied().unwrap_or(0.0) / slot.price.0
                };
                heads
                    .max_by(|(band_a, a), (band_b, b)| {
                        score(*band_a, a)
                            .total_cmp(&score(*band_b, b))
                            .then_with(|| b.cmp(a))
                    })
                    .map(|(_, slot)| slot.offer)
            }
        }
    }

    /// Offers indexed here, pending ones included.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        for band in self.bands.iter_mut() {
            band.clear();
        }
        self.index.clear();
        self.pending.clear();
    }

    /// Searchable offers by band, cheapest first.
    pub fn iter(&self) -> impl Iterator<Item = OfferId> + '_ {
        self.bands
            .iter()
            .flat_map(|band| band.iter().map(|slot| slot.offer))
    }

    pub fn band_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.bands.len()];
        for (band, _) in self.index.values() {
            sizes[*band] += 1;
        }
        sizes
    }

    pub fn cheapest_in_band(&self, band: usize) -> Option<f64> {
        self.bands
            .get(band)
            .and_then(|slots| slots.first())
            .map(|slot| slot.price.0)
    }

    /// Cheapest searchable price of every band.
    pub fn min_price_per_band(&self) -> Vec<Option<f64>> {
        (0..self.bands.len())
            .map(|band| self.cheapest_in_band(band))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DwellingId;

    fn record(id: usize, quality: usize, price: f64, listed_at: usize) -> OfferRecord {
        OfferRecord::new(OfferId(id), DwellingId(id), quality, price, listed_at, false)
    }

    fn prepared(records: &[OfferRecord]) -> PriorityQueue2D {
        let mut queue = PriorityQueue2D::new(10);
        for r in records {
            queue.insert(r).unwrap();
        }
        queue.prepare();
        queue
    }

    #[test]
    fn cheaper_higher_quality_offer_wins_under_ceiling() {
        // 100 @ q3 and 90 @ q5, bid at 95: only the q5 offer is eligible
        let queue = prepared(&[record(0, 3, 100.0, 0), record(1, 5, 90.0, 0)]);
        assert_eq!(queue.best_for(95.0, Dominance::PriceQuality), Some(OfferId(1)));
    }

    #[test]
    fn highest_quality_under_ceiling_wins() {
        let queue = prepared(&[
            record(0, 2, 50.0, 0),
            record(1, 7, 120.0, 0),
            record(2, 6, 99.0, 0),
        ]);
        assert_eq!(queue.best_for(100.0, Dominance::PriceQuality), Some(OfferId(2)));
        assert_eq!(queue.best_for(200.0, Dominance::PriceQuality), Some(OfferId(1)));
        assert_eq!(queue.best_for(60.0, Dominance::PriceQuality), Some(OfferId(0)));
    }

    #[test]
    fn nothing_under_ceiling_returns_none() {
        let queue = prepared(&[record(0, 2, 50.0, 0)]);
        assert_eq!(queue.best_for(49.99, Dominance::PriceQuality), None);
        assert_eq!(queue.best_for(f64::NAN, Dominance::PriceQuality), None);
    }

    #[test]
    fn ceiling_is_inclusive() {
        let queue = prepared(&[record(0, 2, 50.0, 0)]);
        assert_eq!(queue.best_for(50.0, Dominance::PriceQuality), Some(OfferId(0)));
    }

    #[test]
    fn quality_ties_go_to_lower_price_then_earlier_listing() {
        let queue = prepared(&[
            record(0, 4, 80.0, 3),
            record(1, 4, 70.0, 5),
            record(2, 4, 70.0, 2),
        ]);
        assert_eq!(queue.best_for(100.0, Dominance::PriceQuality), Some(OfferId(2)));
    }

    #[test]
    fn same_price_and_listing_falls_back_to_offer_id() {
        let queue = prepared(&[record(5, 4, 70.0, 1), record(3, 4, 70.0, 1)]);
        assert_eq!(queue.best_for(100.0, Dominance::PriceQuality), Some(OfferId(3)));
    }

    #[test]
    fn yield_ordering_prefers_rent_over_quality() {
        // Band 1 rents for 12/yr, band 8 for 20/yr.
        let mut rent = vec![0.0; 10];
        rent[1] = 12.0;
        rent[8] = 20.0;
        let queue = prepared(&[record(0, 1, 100.0, 0), record(1, 8, 200.0, 0)]);
        let dominance = Dominance::PriceYield {
            annual_rent_flow: &rent,
        };

        // 12% yield beats 10%
        assert_eq!(queue.best_for(250.0, dominance), Some(OfferId(0)));
        assert_eq!(
            queue.best_for(250.0, Dominance::PriceQuality),
            Some(OfferId(1))
        );
    }

    #[test]
    fn yield_ties_go_to_lower_price() {
        let mut rent = vec![0.0; 10];
        rent[1] = 10.0;
        rent[2] = 20.0;
        // Both yield 10%
        let queue = prepared(&[record(0, 1, 100.0, 0), record(1, 2, 200.0, 0)]);
        let dominance = Dominance::PriceYield {
            annual_rent_flow: &rent,
        };
        assert_eq!(queue.best_for(500.0, dominance), Some(OfferId(0)));
    }

    #[test]
    fn insertions_are_invisible_until_prepared() {
        let mut queue = prepared(&[record(0, 1, 100.0, 0)]);
        queue.insert(&record(1, 9, 50.0, 1)).unwrap();
        assert!(!queue.is_prepared());
        assert_eq!(queue.len(), 2);

        queue.prepare();
        assert_eq!(queue.best_for(100.0, Dominance::PriceQuality), Some(OfferId(1)));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "inserted twice"))]
    fn duplicate_insert_is_rejected() {
        let mut queue = PriorityQueue2D::new(10);
        let r = record(0, 1, 100.0, 0);
        queue.insert(&r).unwrap();
        assert_eq!(queue.insert(&r), Err(MarketError::DuplicateOffer(OfferId(0))));
    }

    #[test]
    fn out_of_range_band_is_rejected() {
        let mut queue = PriorityQueue2D::new(2);
        assert!(matches!(
            queue.insert(&record(0, 2, 100.0, 0)),
            Err(MarketError::QualityOutOfRange { .. })
        ));
    }

    #[test]
    fn removal_is_idempotent() {
        let mut queue = prepared(&[record(0, 1, 100.0, 0), record(1, 1, 120.0, 0)]);
        assert!(queue.remove(OfferId(0)));
        assert!(!queue.remove(OfferId(0)));
        assert!(!queue.remove(OfferId(42)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.best_for(200.0, Dominance::PriceQuality), Some(OfferId(1)));
    }

    #[test]
    fn pending_offer_can_be_removed_before_prepare() {
        let mut queue = PriorityQueue2D::new(10);
        queue.insert(&record(0, 1, 100.0, 0)).unwrap();
        assert!(queue.remove(OfferId(0)));
        queue.prepare();
        assert!(queue.is_empty());
        assert_eq!(queue.best_for(1000.0, Dominance::PriceQuality), None);
    }

    #[test]
    fn reinsert_after_reprice_moves_the_offer() {
        let mut queue = prepared(&[record(0, 1, 100.0, 0), record(1, 1, 90.0, 0)]);
        let mut repriced = record(0, 1, 100.0, 0);
        queue.remove(repriced.id());
        repriced.set_price(80.0);
        queue.insert(&repriced).unwrap();
        queue.prepare();

        assert_eq!(queue.best_for(85.0, Dominance::PriceQuality), Some(OfferId(0)));
        assert_eq!(queue.cheapest_in_band(1), Some(80.0));
    }

    #[test]
    fn best_for_matches_a_linear_scan() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let records: Vec<OfferRecord> = (0..300)
            .map(|id| {
                record(
                    id,
                    rng.random_range(0..10),
                    rng.random_range(1..50) as f64 * 10.0,
                    rng.random_range(0..12),
                )
            })
            .collect();
        let queue = prepared(&records);

        for ceiling in (0..60).map(|c| c as f64 * 9.0) {
            let expected = records
                .iter()
                .filter(|r| r.price() <= ceiling)
                .min_by(|a, b| {
                    b.quality()
                        .cmp(&a.quality())
                        .then(a.price().total_cmp(&b.price()))
                        .then(a.listed_at().cmp(&b.listed_at()))
                        .then(a.id().cmp(&b.id()))
                })
                .map(|r| r.id());
            assert_eq!(queue.best_for(ceiling, Dominance::PriceQuality), expected);
        }
    }

    #[test]
    fn band_sizes_count_pending_offers() {
        let mut queue = prepared(&[record(0, 1, 100.0, 0)]);
        queue.insert(&record(1, 1, 90.0, 0)).unwrap();
        queue.insert(&record(2, 3, 90.0, 0)).unwrap();
        let sizes = queue.band_sizes();
        assert_eq!(sizes[1], 2);
        assert_eq!(sizes[3], 1);
        assert_eq!(queue.iter().count(), 1);
    }
}
