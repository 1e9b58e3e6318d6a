//! Clues: per-token evidence for a tag

use crate::item::TokenId;
use std::collections::BTreeMap;

/// A token whose trained probability deviates from 0.5 enough to be
/// used as evidence when classifying an item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clue {
    token_id: TokenId,
    probability: f64,
    strength: f64,
}

impl Clue {
    /// Strength is derived from the probability, never stored independently.
    pub fn new(token_id: TokenId, probability: f64) -> Self {
        Self {
            token_id,
            probability,
            strength: (probability - 0.5).abs() * 2.0,
        }
    }

    pub fn token_id(&self) -> TokenId {
        self.token_id
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }
}

/// Token-indexed clue storage with ordered lookup.
#[derive(Debug, Default, Clone)]
pub struct ClueStore {
    clues: BTreeMap<TokenId, Clue>,
}

impl ClueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a clue for a token, replacing any previous one.
    pub fn add(&mut self, token_id: TokenId, probability: f64) -> &Clue {
        self.clues.insert(token_id, Clue::new(token_id, probability));
        &self.clues[&token_id]
    }

    pub fn get(&self, token_id: TokenId) -> Option<&Clue> {
        self.clues.get(&token_id)
    }

    pub fn len(&self) -> usize {
        self.clues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clues.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Clue> {
        self.clues.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strength_is_distance_from_even_odds() {
        assert_eq!(Clue::new(1, 0.5).strength(), 0.0);
        assert_eq!(Clue::new(1, 0.75).strength(), 0.5);
        assert_eq!(Clue::new(1, 0.25).strength(), 0.5);
        assert_eq!(Clue::new(1, 1.0).strength(), 1.0);
        assert_eq!(Clue::new(1, 0.0).strength(), 1.0);
    }

    #[test]
    fn store_lookup_and_replace() {
        let mut store = ClueStore::new();
        store.add(7, 0.9);
        assert_eq!(store.get(7).unwrap().probability(), 0.9);
        assert!(store.get(8).is_none());

        store.add(7, 0.2);
        assert_eq!(store.get(7).unwrap().probability(), 0.2);
        assert_eq!(store.len(), 1);
    }
}
