//! Model configuration.
//!
//! Everything is loaded from a single TOML file with `[market]`, `[simulation]`,
//! `[households]` and `[output]` tables. Missing keys fall back to the baseline
//! values below, so an empty file is a valid configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Parameters of the clearing engine itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Multiplicative step of the bid-up auction; 1.0 disables bid-up
    pub bid_up_factor: f64,
    pub round_budget_floor: usize,
    /// Rounds = max(floor, population / divisor)
    pub round_budget_divisor: usize,
    /// Calibrated expected time under offer, in months
    pub months_under_offer: f64,
    pub n_quality_bands: usize,
    /// Population the enough-bids heuristic is scaled against
    pub target_population: usize,

    // Buy-to-let affordability (minimum down payment)
    pub interest_cover_ratio_limit: f64,
    pub btl_stressed_interest_rate: f64,

    /// Whether losing bids priced below the final sale price get another round
    pub requeue_underbidders: bool,

    // Regional statistics
    pub price_average_decay: f64,
    /// Decay of the months-on-market average that drives rental occupancy
    pub months_on_market_decay: f64,
    pub yield_average_decay: f64,
    pub tenancy_length_months: f64,
    pub initial_rent_gross_yield: f64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self::baseline()
    }
}

impl MarketConfig {
    pub fn baseline() -> Self {
        MarketConfig {
            bid_up_factor: 1.0075,
            round_budget_floor: 10,
            round_budget_divisor: 50,
            months_under_offer: 7.0 / 30.0,
            n_quality_bands: 48,
            target_population: 10_000,
            interest_cover_ratio_limit: 1.25,
            btl_stressed_interest_rate: 0.05,
            requeue_underbidders: true,
            price_average_decay: 0.8,
            months_on_market_decay: 0.92,
            yield_average_decay: 0.8,
            tenancy_length_months: 18.0,
            initial_rent_gross_yield: 0.05,
        }
    }

    /// Same engine with the bid-up auction switched off.
    pub fn without_bid_up() -> Self {
        MarketConfig {
            bid_up_factor: 1.0,
            ..Self::baseline()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.bid_up_factor.is_finite() || self.bid_up_factor < 1.0 {
            return Err(ConfigError::invalid(
                "market.bid_up_factor",
                format!("must be finite and >= 1, got {}", self.bid_up_factor),
            ));
        }
        if self.round_budget_divisor == 0 {
            return Err(ConfigError::invalid("market.round_budget_divisor", "must be > 0"));
        }
        if self.round_budget_floor == 0 {
            return Err(ConfigError::invalid("market.round_budget_floor", "must be > 0"));
        }
        if !self.months_under_offer.is_finite() || self.months_under_offer < 0.0 {
            return Err(ConfigError::invalid(
                "market.months_under_offer",
                format!("must be finite and >= 0, got {}", self.months_under_offer),
            ));
        }
        if self.n_quality_bands == 0 {
            return Err(ConfigError::invalid("market.n_quality_bands", "must be > 0"));
        }
        if self.target_population == 0 {
            return Err(ConfigError::invalid("market.target_population", "must be > 0"));
        }
        if self.interest_cover_ratio_limit <= 0.0 || self.btl_stressed_interest_rate <= 0.0 {
            return Err(ConfigError::invalid(
                "market.interest_cover_ratio_limit",
                "ICR limit and stressed rate must both be > 0",
            ));
        }
        for (field, decay) in [
            ("market.price_average_decay", self.price_average_decay),
            ("market.months_on_market_decay", self.months_on_market_decay),
            ("market.yield_average_decay", self.yield_average_decay),
        ] {
            if !(0.0..1.0).contains(&decay) {
                return Err(ConfigError::invalid(field, format!("must be in [0, 1), got {decay}")));
            }
        }
        if self.tenancy_length_months <= 0.0 {
            return Err(ConfigError::invalid("market.tenancy_length_months", "must be > 0"));
        }
        Ok(())
    }
}

/// Population and run length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub months: usize,
    pub seed: u64,
    pub households: usize,
    pub dwellings: usize,
    /// Share of households that start as owner-occupiers
    pub ownership_rate: f64,
    /// Share of households that behave as buy-to-let investors
    pub investor_share: f64,
    pub median_house_price: f64,
    /// Log-price gap between the lowest and the highest quality band
    pub house_price_spread: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        SimulationSettings {
            months: 120,
            seed: 42,
            households: 500,
            dwellings: 520,
            ownership_rate: 0.65,
            investor_share: 0.08,
            median_house_price: 200_000.0,
            house_price_spread: 1.2,
        }
    }
}

/// Zero-intelligence household behaviour used to drive the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HouseholdBehaviour {
    pub monthly_income_median: f64,
    pub income_log_sd: f64,
    pub saving_rate: f64,
    /// Max purchase price as a multiple of annual income
    pub income_multiple: f64,
    pub deposit_fraction: f64,
    pub rent_income_fraction: f64,
    /// Monthly probability that an owner-occupier puts their home up for sale
    pub sale_probability: f64,
    /// Monthly probability that a renter tries to buy
    pub purchase_probability: f64,
    pub btl_bid_probability: f64,
    /// Investor max price as a multiple of liquid wealth
    pub btl_leverage: f64,
    pub list_markup: f64,
    pub price_reduction: f64,
    pub max_months_listed: usize,
    /// Starting bank balance in months of income
    pub initial_savings_months: f64,
    /// Spread of bids around the household's budget
    pub bid_noise: f64,
}

impl Default for HouseholdBehaviour {
    fn default() -> Self {
        HouseholdBehaviour {
            monthly_income_median: 3_000.0,
            income_log_sd: 0.4,
            saving_rate: 0.1,
            income_multiple: 4.5,
            deposit_fraction: 0.1,
            rent_income_fraction: 0.33,
            sale_probability: 0.01,
            purchase_probability: 0.05,
            btl_bid_probability: 0.1,
            btl_leverage: 4.0,
            list_markup: 1.05,
            price_reduction: 0.95,
            max_months_listed: 12,
            initial_savings_months: 12.0,
            bid_noise: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub directory: String,
    pub write_timeseries: bool,
    pub write_transactions: bool,
    pub write_summary: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        OutputSettings {
            directory: "results".to_string(),
            write_timeseries: true,
            write_transactions: false,
            write_summary: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub market: MarketConfig,
    pub simulation: SimulationSettings,
    pub households: HouseholdBehaviour,
    pub output: OutputSettings,
}

impl SimulationConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.market.validate()?;
        let sim = &self.simulation;
        if sim.households == 0 {
            return Err(ConfigError::invalid("simulation.households", "must be > 0"));
        }
        for (field, share) in [
            ("simulation.ownership_rate", sim.ownership_rate),
            ("simulation.investor_share", sim.investor_share),
        ] {
            if !(0.0..=1.0).contains(&share) {
                return Err(ConfigError::invalid(field, format!("must be in [0, 1], got {share}")));
            }
        }
        if sim.median_house_price <= 0.0 {
            return Err(ConfigError::invalid("simulation.median_house_price", "must be > 0"));
        }
        let behaviour = &self.households;
        if behaviour.monthly_income_median <= 0.0 || behaviour.income_log_sd < 0.0 {
            return Err(ConfigError::invalid(
                "households.monthly_income_median",
                "income median must be > 0 and log sd >= 0",
            ));
        }
        if !(0.0..=1.0).contains(&behaviour.price_reduction) || behaviour.price_reduction == 0.0 {
            return Err(ConfigError::invalid("households.price_reduction", "must be in (0, 1]"));
        }
        Ok(())
    }

    /// Reference sale price of a quality band: log-linear in quality, centred
    /// on the median house price.
    pub fn reference_price(&self, quality: usize) -> f64 {
        let bands = self.market.n_quality_bands.max(1) as f64;
        let position = (quality as f64 + 0.5) / bands - 0.5;
        self.simulation.median_house_price * (self.simulation.house_price_spread * position).exp()
    }

    pub fn reference_prices(&self) -> Vec<f64> {
        (0..self.market.n_quality_bands)
            .map(|quality| self.reference_price(quality))
            .collect()
    }
}
