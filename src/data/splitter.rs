// ============================================================
// Layer 4 — Train/Dev Splitter
// ============================================================
// Used when the configured dev file does not exist: a share of
// the training instances is shuffled out and held back as the
// dev set.
//
// The caller owns the RNG so a seeded run holds out the same
// sentences every time.
//
// Uses Fisher-Yates shuffle via rand::seq::SliceRandom.

use rand::{seq::SliceRandom, Rng};

/// Shuffle `samples` and split into (train, held_out).
///
/// # Arguments
/// * `samples`       - All available samples (consumed by this function)
/// * `held_out_share` - Proportion to hold back, e.g. 0.1 = 10%
pub fn split_held_out<T, R: Rng + ?Sized>(
    mut samples: Vec<T>,
    held_out_share: f64,
    rng: &mut R,
) -> (Vec<T>, Vec<T>) {
    samples.shuffle(rng);

    let total = samples.len();
    let held_out = ((total as f64) * held_out_share).ceil() as usize;
    let split_at = total - held_out.min(total);

    // split_off(n) removes elements [n..] and returns them
    let held = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} held out",
        samples.len(),
        held.len(),
    );

    (samples, held)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let (train, dev) = split_held_out(items, 0.1, &mut StdRng::seed_from_u64(1));
        assert_eq!(train.len(), 90);
        assert_eq!(dev.len(), 10);
    }

    #[test]
    fn test_all_items_preserved() {
        let items: Vec<usize> = (0..50).collect();
        let (train, dev) = split_held_out(items, 0.3, &mut StdRng::seed_from_u64(2));
        let mut all: Vec<usize> = train.into_iter().chain(dev).collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_dataset() {
        let items: Vec<usize> = Vec::new();
        let (train, dev) = split_held_out(items, 0.1, &mut StdRng::seed_from_u64(3));
        assert!(train.is_empty());
        assert!(dev.is_empty());
    }

    #[test]
    fn test_tiny_dataset_still_holds_one_out() {
        let items: Vec<usize> = (0..3).collect();
        let (train, dev) = split_held_out(items, 0.1, &mut StdRng::seed_from_u64(4));
        assert_eq!(train.len(), 2);
        assert_eq!(dev.len(), 1);
    }

    #[test]
    fn test_same_seed_same_split() {
        let a = split_held_out((0..20).collect::<Vec<usize>>(), 0.1, &mut StdRng::seed_from_u64(9));
        let b = split_held_out((0..20).collect::<Vec<usize>>(), 0.1, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }
}
