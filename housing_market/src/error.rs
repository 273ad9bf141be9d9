use thiserror::Error;

use crate::market::MarketKind;
use crate::{DwellingId, OfferId};

/// Misuse of the market API by a collaborator.
///
/// None of these happen when callers respect the listing protocol; domain
/// outcomes such as "no affordable offer" are not errors and never show up here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketError {
    #[error("{0} is already indexed by this priority queue")]
    DuplicateOffer(OfferId),

    #[error("quality band {quality} outside [0, {bands})")]
    QualityOutOfRange { quality: usize, bands: usize },

    #[error("price must be finite and positive, got {0}")]
    InvalidPrice(f64),

    #[error("unknown {0}")]
    UnknownDwelling(DwellingId),

    #[error("{dwelling} is already on the {kind} market as {offer}")]
    AlreadyListed {
        dwelling: DwellingId,
        kind: MarketKind,
        offer: OfferId,
    },

    #[error("{0} is not listed on this market")]
    OfferNotListed(OfferId),

    #[error("{dwelling} has no {kind} offer")]
    DwellingNotListed { dwelling: DwellingId, kind: MarketKind },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Market(#[from] MarketError),

    #[error("invalid income distribution: {0}")]
    Income(String),
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("cannot write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot write csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("cannot write json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no region statistics in simulation output")]
    MissingRegion,
}
