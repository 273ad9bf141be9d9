//! Regional housing market ABM
//!
//! The core of this crate is the monthly market-clearing engine: offers on a
//! sale or rental market are kept in a two-key priority structure (price vs.
//! quality, and for sales also price vs. rental yield), bids are matched
//! against it over several rounds, oversubscribed offers are resolved by a
//! stochastic bid-up auction, and each commit moves ownership or tenancy of a
//! dwelling.
//!
//! Key pieces:
//! - [`priority_queue::PriorityQueue2D`]: best offer at or below a price ceiling
//! - [`market::Market`]: listing, bidding and the multi-round `clear`
//! - [`bid_up`]: oversubscription pricing and winner selection
//! - [`region::Region`]: a sale and a rental market sharing one dwelling stock
//! - [`simulation`]: the `des` event loop driving a region and its households
//!   month by month (agents in [`coordinator`] and [`household`])

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod bid_up;
pub mod config;
pub mod coordinator;
pub mod dwelling;
pub mod error;
pub mod household;
pub mod market;
pub mod output;
pub mod priority_queue;
pub mod record;
pub mod region;
pub mod simulation;
pub mod stats;
pub mod transaction;

pub use config::{MarketConfig, SimulationConfig};
pub use error::{ConfigError, MarketError, OutputError, SimulationError};
pub use market::{Market, MarketKind};
pub use output::SimulationOutput;
pub use record::{Bid, OfferRecord};
pub use region::{MonthReport, Region};
pub use simulation::{Event, Simulation, Stats};
pub use transaction::{ClearingReport, Transaction, TransactionListener};

pub const MONTHS_IN_YEAR: f64 = 12.0;

/// A household taking part in the market (buyer, seller, landlord or tenant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HouseholdId(pub usize);

/// Index of a dwelling in its region's [`dwelling::Dwellings`] registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DwellingId(pub usize);

/// Handle of an offer, unique within the market that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OfferId(pub usize);

impl fmt::Display for HouseholdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "household#{}", self.0)
    }
}

impl fmt::Display for DwellingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dwelling#{}", self.0)
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offer#{}", self.0)
    }
}
