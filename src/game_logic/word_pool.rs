use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;

use crate::content::Theme;

/// Theme words that have not been served yet in this match.
pub fn available(theme: &Theme, used_words: &HashSet<String>) -> Vec<String> {
    theme
        .words
        .iter()
        .filter(|word| !used_words.contains(*word))
        .cloned()
        .collect()
}

/// Returns a uniformly random permutation of `words` (Fisher-Yates). The
/// input slice is left untouched.
pub fn shuffle<R: Rng + ?Sized>(words: &[String], rng: &mut R) -> Vec<String> {
    let mut order = words.to_vec();
    order.shuffle(rng);
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::theme_fixture;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_available_is_set_difference() {
        let theme = theme_fixture(100, &["A", "B"]);
        let used: HashSet<String> = theme.words[..40].iter().cloned().collect();

        let pool = available(&theme, &used);
        assert_eq!(pool.len(), 60);
        assert!(pool.iter().all(|w| !used.contains(w)));
    }

    #[test]
    fn test_available_empty_when_all_used() {
        let theme = theme_fixture(100, &["A", "B"]);
        let used: HashSet<String> = theme.words.iter().cloned().collect();
        assert!(available(&theme, &used).is_empty());
    }

    #[test]
    fn test_shuffle_is_permutation_and_keeps_input() {
        let words: Vec<String> = (0..50).map(|i| format!("w{}", i)).collect();
        let original = words.clone();
        let mut rng = StdRng::seed_from_u64(7);

        let shuffled = shuffle(&words, &mut rng);
        assert_eq!(words, original);

        let mut sorted = shuffled.clone();
        sorted.sort();
        let mut expected = original.clone();
        expected.sort();
        assert_eq!(sorted, expected);
        assert_ne!(shuffled, original, "50 elements should not stay in order");
    }

    #[test]
    fn test_shuffle_hits_every_position() {
        // Every element of a 3-element list should land first at some point.
        let words: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        let mut rng = StdRng::seed_from_u64(11);
        let mut firsts = HashSet::new();
        for _ in 0..200 {
            firsts.insert(shuffle(&words, &mut rng)[0].clone());
        }
        assert_eq!(firsts.len(), 3);
    }

    #[test]
    fn test_shuffle_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(shuffle(&[], &mut rng).is_empty());
    }
}
