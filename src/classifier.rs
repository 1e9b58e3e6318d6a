//! Naive Bayes classification math
//!
//! Per-token probabilities follow Gary Robinson's technique: each training
//! side contributes an observed frequency, the foreground/background ratio
//! is shrunk toward even odds in proportion to how little data backs it,
//! and an item's selected clues are combined with Fisher's method through
//! the chi-squared survival function.

use crate::clue::{Clue, ClueStore};
use crate::item::{Item, TokenId};
use crate::pool::Pool;

/// Robinson prior weight given to the even-odds assumption.
const UNKNOWN_WORD_STRENGTH: f64 = 0.45;
/// Probability assumed for a token with no training data.
const UNKNOWN_WORD_PROB: f64 = 0.5;
/// Clues at or below this strength carry no usable signal.
const MIN_CLUE_STRENGTH: f64 = 0.05;

/// One training cloud's view of a token: occurrences and cloud size.
#[derive(Debug, Clone, Copy)]
pub struct ProbToken {
    pub token_count: u32,
    pub pool_size: u32,
}

impl ProbToken {
    pub fn new(token_count: u32, pool_size: u32) -> Self {
        Self {
            token_count,
            pool_size,
        }
    }
}

/// Survival function of the chi-squared distribution for even degrees of
/// freedom, via the iterative series for the regularized incomplete gamma.
///
/// Returns -1.0 when `df` is odd or not positive. The series is summed
/// through `df / 2` inclusive; the classifier's calibrated scores depend
/// on that bound.
pub fn chi2_q(x: f64, df: i32) -> f64 {
    if df < 1 || df % 2 != 0 {
        return -1.0;
    }

    let m = x / 2.0;
    let mut term = (-m).exp();
    let mut sum = term;
    for i in 1..=(df / 2) {
        term *= m / i as f64;
        sum += term;
    }

    sum.min(1.0)
}

/// Observed frequency for one side of the corpus: the mean of
/// `count / size` over the clouds that actually saw the token.
fn side_probability(clouds: &[ProbToken]) -> f64 {
    let mut sum = 0.0;
    let mut seen = 0u32;
    for cloud in clouds {
        if cloud.pool_size > 0 && cloud.token_count > 0 {
            sum += cloud.token_count as f64 / cloud.pool_size as f64;
            seen += 1;
        }
    }
    if seen == 0 {
        0.0
    } else {
        sum / seen as f64
    }
}

/// Bayesian probability that a token indicates the tag, given foreground
/// (positive) and background (negative plus random) training clouds.
pub fn probability(foregrounds: &[ProbToken], backgrounds: &[ProbToken]) -> f64 {
    probability_with_bias(foregrounds, backgrounds, 1.0)
}

/// [`probability`] with the foreground contribution re-weighted by `bias`.
pub fn probability_with_bias(
    foregrounds: &[ProbToken],
    backgrounds: &[ProbToken],
    bias: f64,
) -> f64 {
    let fg_prob = side_probability(foregrounds) * bias;
    let bg_prob = side_probability(backgrounds);

    if fg_prob + bg_prob == 0.0 {
        return UNKNOWN_WORD_PROB;
    }

    let fg_size: u32 = foregrounds.iter().map(|c| c.pool_size).sum();
    let bg_size: u32 = backgrounds.iter().map(|c| c.pool_size).sum();

    let ratio = fg_prob / (fg_prob + bg_prob);

    // Weight of the observed ratio against the even-odds prior. Each
    // side's frequency counts for as much as the opposing side is large;
    // a side with no tokens at all still contributes unit weight.
    let n = fg_prob * bg_size.max(1) as f64 + bg_prob * fg_size.max(1) as f64;

    (UNKNOWN_WORD_STRENGTH * UNKNOWN_WORD_PROB + n * ratio) / (UNKNOWN_WORD_STRENGTH + n)
}

/// The classification capability a tagger is built over. Fixed to
/// [`NaiveBayes`] in production; a seam for alternative classifiers.
pub trait Classifier: Send + Sync {
    /// Probability that `token` indicates the tag, from the three
    /// training clouds.
    fn token_probability(
        &self,
        positive: &Pool,
        negative: &Pool,
        random: &Pool,
        token: TokenId,
        bias: f64,
    ) -> f64;

    /// Clues for an item's tokens, strongest first. Weak clues are
    /// dropped entirely.
    fn select_clues<'a>(&self, store: &'a ClueStore, item: &Item) -> Vec<&'a Clue>;

    /// Combine selected clues into a single strength in [0, 1].
    fn combine(&self, clues: &[&Clue], bias: f64) -> f64;
}

/// The production Naive Bayes implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaiveBayes;

impl Classifier for NaiveBayes {
    fn token_probability(
        &self,
        positive: &Pool,
        negative: &Pool,
        random: &Pool,
        token: TokenId,
        bias: f64,
    ) -> f64 {
        let foregrounds = [ProbToken::new(
            positive.token_count(token),
            positive.total_tokens(),
        )];
        let backgrounds = [
            ProbToken::new(negative.token_count(token), negative.total_tokens()),
            ProbToken::new(random.token_count(token), random.total_tokens()),
        ];
        probability_with_bias(&foregrounds, &backgrounds, bias)
    }

    fn select_clues<'a>(&self, store: &'a ClueStore, item: &Item) -> Vec<&'a Clue> {
        let mut clues: Vec<&Clue> = item
            .tokens()
            .filter_map(|(token, _)| store.get(*token))
            .filter(|clue| clue.strength() > MIN_CLUE_STRENGTH)
            .collect();

        clues.sort_by(|a, b| {
            b.strength()
                .partial_cmp(&a.strength())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.token_id().cmp(&b.token_id()))
        });

        clues
    }

    fn combine(&self, clues: &[&Clue], bias: f64) -> f64 {
        if clues.is_empty() {
            return 0.5;
        }

        let n = clues.len() as i32;
        let ln_prob: f64 = clues.iter().map(|c| c.probability().ln()).sum();
        let ln_inverse: f64 = clues.iter().map(|c| (1.0 - c.probability()).ln()).sum();

        let h = chi2_q(-2.0 * ln_prob, 2 * n);
        let s = chi2_q(-2.0 * ln_inverse, 2 * n);
        let score = (1.0 + h - s) / 2.0;

        (0.5 + (score - 0.5) * bias).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(expected: f64, actual: f64) {
        assert!(
            (expected - actual).abs() < 1e-5,
            "expected {expected}, got {actual}"
        );
    }

    fn prob(pc: u32, ps: u32, nc: u32, ns: u32, bc: u32, bs: u32) -> f64 {
        let foregrounds = [ProbToken::new(pc, ps)];
        let backgrounds = [ProbToken::new(nc, ns), ProbToken::new(bc, bs)];
        probability(&foregrounds, &backgrounds)
    }

    #[test]
    fn probability_with_both_sides_trained() {
        assert_close(0.33912483912, prob(5, 20, 5, 10, 0, 0));
    }

    #[test]
    fn probability_with_an_empty_random_cloud() {
        assert_close(0.33782435130, prob(5, 20, 5, 10, 0, 15));
    }

    #[test]
    fn probability_with_a_trained_random_cloud() {
        assert_close(0.44530060883, prob(5, 20, 5, 10, 10, 80));
    }

    #[test]
    fn probability_with_only_background_data() {
        assert_close(0.23684210526, prob(0, 0, 5, 10, 0, 0));
    }

    #[test]
    fn probability_with_only_foreground_data() {
        assert_close(0.67857142857, prob(5, 20, 0, 0, 0, 0));
    }

    #[test]
    fn probability_with_balanced_sides_is_even() {
        assert_close(0.5, prob(5, 20, 5, 20, 0, 0));
    }

    #[test]
    fn probability_with_no_data_is_even() {
        assert_close(0.5, prob(0, 0, 0, 0, 0, 0));
    }

    #[test]
    fn probability_hook_applies_bias_to_the_foreground() {
        let mut positive = Pool::new();
        positive.add_item(&Item::with_tokens("1", &[(1, 5), (2, 15)]));
        let mut negative = Pool::new();
        negative.add_item(&Item::with_tokens("2", &[(1, 5), (2, 5)]));
        let random = Pool::new();

        let nb = NaiveBayes;
        assert_close(
            0.33912483912,
            nb.token_probability(&positive, &negative, &random, 1, 1.0),
        );
        assert_close(
            0.35978739003,
            nb.token_probability(&positive, &negative, &random, 1, 1.1),
        );
    }

    #[test]
    fn chi2_rejects_odd_degrees_of_freedom() {
        assert_close(-1.0, chi2_q(10.0, 11));
    }

    #[test]
    fn chi2_rejects_nonpositive_degrees_of_freedom() {
        assert_close(-1.0, chi2_q(10.0, 0));
    }

    #[test]
    fn chi2_saturates_at_one() {
        assert_close(1.0, chi2_q(100.0, 300));
    }

    #[test]
    fn chi2_vanishes_for_extreme_statistics() {
        assert_close(0.0, chi2_q(1000.0, 300));
    }

    #[test]
    fn chi2_reference_values() {
        assert_close(0.82913752732, chi2_q(375.0, 400));
        assert_close(0.52169717971, chi2_q(300.0, 300));
    }

    fn reference_store() -> ClueStore {
        let mut store = ClueStore::new();
        store.add(1, 0.75);
        store.add(2, 0.51);
        store.add(3, 0.10);
        store.add(4, 0.95);
        store
    }

    fn score(tokens: &[TokenId]) -> f64 {
        let store = reference_store();
        let pairs: Vec<(TokenId, u32)> = tokens.iter().map(|t| (*t, 1)).collect();
        let item = Item::with_tokens("1", &pairs);
        let nb = NaiveBayes;
        let clues = nb.select_clues(&store, &item);
        nb.combine(&clues, 1.0)
    }

    #[test]
    fn clue_selection_filters_out_weak_clues() {
        let store = reference_store();
        let item = Item::with_tokens("1", &[(1, 1), (2, 1)]);
        let clues = NaiveBayes.select_clues(&store, &item);
        assert_eq!(clues.len(), 1);
        assert_eq!(clues[0].token_id(), 1);
    }

    #[test]
    fn clue_selection_sorts_by_strength() {
        let store = reference_store();
        let item = Item::with_tokens("1", &[(1, 1), (2, 1), (4, 1)]);
        let clues = NaiveBayes.select_clues(&store, &item);
        assert_eq!(clues.len(), 2);
        assert_eq!(clues[0].token_id(), 4);
        assert_eq!(clues[1].token_id(), 1);
    }

    #[test]
    fn combining_nothing_is_even_odds() {
        assert_close(0.5, score(&[10]));
        assert_close(0.5, score(&[2]));
    }

    #[test]
    fn combining_single_clues() {
        assert_close(0.89947100800, score(&[4]));
        assert_close(0.89947100800, score(&[4, 2]));
        assert_close(0.16771702260, score(&[3]));
    }

    #[test]
    fn combining_agreeing_clues() {
        assert_close(0.90383289433, score(&[4, 1]));
    }

    #[test]
    fn combining_conflicting_clues() {
        assert_close(0.59043855740, score(&[4, 3]));
        assert_close(0.59043855740, score(&[3, 4]));
        assert_close(0.69125149517, score(&[1, 2, 3, 4]));
    }

    #[test]
    fn bias_scales_the_combined_score_around_even_odds() {
        let store = reference_store();
        let item = Item::with_tokens("1", &[(4, 1)]);
        let nb = NaiveBayes;
        let clues = nb.select_clues(&store, &item);

        let unbiased = nb.combine(&clues, 1.0);
        let biased = nb.combine(&clues, 1.2);
        assert_close(0.5 + (unbiased - 0.5) * 1.2, biased);

        // Large biases clamp instead of overflowing the unit interval.
        assert_close(1.0, nb.combine(&clues, 10.0));
    }
}
