//! Dwelling stock of one region.
//!
//! Dwellings refer to their offers by [`OfferId`] and markets refer to
//! dwellings by [`DwellingId`]; the registry is the only owner of dwelling
//! state and keeps a household → residence index in step with it.

use std::collections::HashMap;

use crate::error::MarketError;
use crate::market::MarketKind;
use crate::{DwellingId, HouseholdId, OfferId};

#[derive(Debug, Clone, PartialEq)]
pub struct Dwelling {
    id: DwellingId,
    quality: usize,
    owner: Option<HouseholdId>,
    resident: Option<HouseholdId>,
    sale_offer: Option<OfferId>,
    rental_offer: Option<OfferId>,
}

impl Dwelling {
    pub fn id(&self) -> DwellingId {
        self.id
    }

    pub fn quality(&self) -> usize {
        self.quality
    }

    pub fn owner(&self) -> Option<HouseholdId> {
        self.owner
    }

    pub fn resident(&self) -> Option<HouseholdId> {
        self.resident
    }

    pub fn is_vacant(&self) -> bool {
        self.resident.is_none()
    }

    /// Occupied by someone other than its owner.
    pub fn is_let(&self) -> bool {
        self.resident.is_some() && self.resident != self.owner
    }

    pub fn offer(&self, kind: MarketKind) -> Option<OfferId> {
        match kind {
            MarketKind::Sale => self.sale_offer,
            MarketKind::Rental => self.rental_offer,
        }
    }

    pub fn is_on_market(&self, kind: MarketKind) -> bool {
        self.offer(kind).is_some()
    }

    pub(crate) fn set_offer(&mut self, kind: MarketKind, offer: Option<OfferId>) {
        match kind {
            MarketKind::Sale => self.sale_offer = offer,
            MarketKind::Rental => self.rental_offer = offer,
        }
    }
}

/// Outcome of a household moving into a dwelling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Relocation {
    /// Where the household lived before, now vacant
    pub previous_home: Option<DwellingId>,
    /// Whoever lived in the target dwelling and had to leave
    pub displaced: Option<HouseholdId>,
}

/// Outcome of an ownership transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    pub previous_owner: Option<HouseholdId>,
    /// Resident who left on completion (the seller, or an evicted tenant)
    pub previous_resident: Option<HouseholdId>,
}

#[derive(Debug, Clone, Default)]
pub struct Dwellings {
    dwellings: Vec<Dwelling>,
    residence: HashMap<HouseholdId, DwellingId>,
    n_quality_bands: usize,
}

impl Dwellings {
    pub fn new(n_quality_bands: usize) -> Self {
        Dwellings {
            dwellings: Vec::new(),
            residence: HashMap::new(),
            n_quality_bands,
        }
    }

    pub fn build(&mut self, quality: usize) -> Result<DwellingId, MarketError> {
        if quality >= self.n_quality_bands {
            return Err(MarketError::QualityOutOfRange {
                quality,
                bands: self.n_quality_bands,
            });
        }
        let id = DwellingId(self.dwellings.len());
        self.dwellings.push(Dwelling {
            id,
            quality,
            owner: None,
            resident: None,
            sale_offer: None,
            rental_offer: None,
        });
        Ok(id)
    }

    pub fn get(&self, id: DwellingId) -> Option<&Dwelling> {
        self.dwellings.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: DwellingId) -> Option<&mut Dwelling> {
        self.dwellings.get_mut(id.0)
    }

    fn require(&self, id: DwellingId) -> Result<&Dwelling, MarketError> {
        self.get(id).ok_or(MarketError::UnknownDwelling(id))
    }

    pub fn len(&self) -> usize {
        self.dwellings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dwellings.is_empty()
    }

    pub fn n_quality_bands(&self) -> usize {
        self.n_quality_bands
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dwelling> {
        self.dwellings.iter()
    }

    pub fn owned_by(&self, household: HouseholdId) -> impl Iterator<Item = &Dwelling> {
        self.dwellings
            .iter()
            .filter(move |dwelling| dwelling.owner == Some(household))
    }

    pub fn residence_of(&self, household: HouseholdId) -> Option<DwellingId> {
        self.residence.get(&household).copied()
    }

    pub fn vacant(&self) -> impl Iterator<Item = &Dwelling> {
        self.dwellings.iter().filter(|dwelling| dwelling.is_vacant())
    }

    pub fn transfer(
        &mut self,
        id: DwellingId,
        new_owner: HouseholdId,
    ) -> Result<Transfer, MarketError> {
        self.require(id)?;
        Ok(self.transfer_known(id, new_owner))
    }

    /// `transfer` for an id already looked up in this registry.
    pub(crate) fn transfer_known(&mut self, id: DwellingId, new_owner: HouseholdId) -> Transfer {
        let previous_resident = self.vacate(id);
        let previous_owner = self.dwellings[id.0].owner.replace(new_owner);
        Transfer {
            previous_owner,
            previous_resident,
        }
    }

    /// Assign an owner without a transaction (initial endowment).
    pub fn assign_owner(&mut self, id: DwellingId, owner: HouseholdId) -> Result<(), MarketError> {
        self.require(id)?;
        self.dwellings[id.0].owner = Some(owner);
        Ok(())
    }

    pub fn move_in(
        &mut self,
        household: HouseholdId,
        id: DwellingId,
    ) -> Result<Relocation, MarketError> {
        self.require(id)?;
        Ok(self.move_in_known(household, id))
    }

    /// `move_in` for an id already looked up in this registry.
    pub(crate) fn move_in_known(&mut self, household: HouseholdId, id: DwellingId) -> Relocation {
        if self.dwellings[id.0].resident == Some(household) {
            return Relocation::default();
        }
        let displaced = self.vacate(id);
        let previous_home = match self.residence.insert(household, id) {
            Some(previous) => {
                self.dwellings[previous.0].resident = None;
                Some(previous)
            }
            None => None,
        };
        self.dwellings[id.0].resident = Some(household);
        Relocation {
            previous_home,
            displaced,
        }
    }

    pub fn move_out(&mut self, id: DwellingId) -> Result<Option<HouseholdId>, MarketError> {
        self.require(id)?;
        Ok(self.vacate(id))
    }

    fn vacate(&mut self, id: DwellingId) -> Option<HouseholdId> {
        let resident = self.dwellings[id.0].resident.take();
        if let Some(household) = resident {
            self.residence.remove(&household);
        }
        resident
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_rejects_out_of_range_quality() {
        let mut dwellings = Dwellings::new(3);
        assert!(dwellings.build(2).is_ok());
        assert_eq!(
            dwellings.build(3),
            Err(MarketError::QualityOutOfRange {
                quality: 3,
                bands: 3
            })
        );
    }

    #[test]
    fn moving_in_vacates_previous_home() {
        let mut dwellings = Dwellings::new(3);
        let first = dwellings.build(0).unwrap();
        let second = dwellings.build(1).unwrap();
        let household = HouseholdId(7);

        dwellings.move_in(household, first).unwrap();
        let relocation = dwellings.move_in(household, second).unwrap();

        assert_eq!(relocation.previous_home, Some(first));
        assert_eq!(relocation.displaced, None);
        assert!(dwellings.get(first).unwrap().is_vacant());
        assert_eq!(dwellings.residence_of(household), Some(second));
    }

    #[test]
    fn moving_into_occupied_dwelling_displaces_resident() {
        let mut dwellings = Dwellings::new(1);
        let dwelling = dwellings.build(0).unwrap();
        dwellings.move_in(HouseholdId(1), dwelling).unwrap();

        let relocation = dwellings.move_in(HouseholdId(2), dwelling).unwrap();

        assert_eq!(relocation.displaced, Some(HouseholdId(1)));
        assert_eq!(dwellings.residence_of(HouseholdId(1)), None);
        assert_eq!(dwellings.residence_of(HouseholdId(2)), Some(dwelling));
    }

    #[test]
    fn transfer_empties_the_dwelling() {
        let mut dwellings = Dwellings::new(1);
        let dwelling = dwellings.build(0).unwrap();
        dwellings.assign_owner(dwelling, HouseholdId(1)).unwrap();
        dwellings.move_in(HouseholdId(2), dwelling).unwrap();
        assert!(dwellings.get(dwelling).unwrap().is_let());

        let transfer = dwellings.transfer(dwelling, HouseholdId(3)).unwrap();

        assert_eq!(transfer.previous_owner, Some(HouseholdId(1)));
        assert_eq!(transfer.previous_resident, Some(HouseholdId(2)));
        assert_eq!(dwellings.get(dwelling).unwrap().owner(), Some(HouseholdId(3)));
        assert!(dwellings.get(dwelling).unwrap().is_vacant());
        assert_eq!(dwellings.owned_by(HouseholdId(3)).count(), 1);
    }

    #[test]
    fn unknown_dwelling_is_an_error() {
        let mut dwellings = Dwellings::new(1);
        assert_eq!(
            dwellings.move_out(DwellingId(5)),
            Err(MarketError::UnknownDwelling(DwellingId(5)))
        );
    }
}
