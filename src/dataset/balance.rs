//! Class balancer for the training split

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use super::loader::{LesionRecord, Label};

/// Shuffled subset with at most `n_benign` "0" rows and `n_malignant` "1" rows.
///
/// A class with fewer rows than requested contributes all of its rows.
pub fn balance_classes<R: Rng + ?Sized>(
    records: &[LesionRecord],
    n_benign: usize,
    n_malignant: usize,
    rng: &mut R,
) -> Vec<LesionRecord> {
    let mut shuffled = records.to_vec();
    shuffled.shuffle(rng);

    let (benign, malignant): (Vec<_>, Vec<_>) = shuffled
        .into_iter()
        .partition(|r| r.label == Label::Benign);

    if benign.len() < n_benign || malignant.len() < n_malignant {
        debug!(
            "Balancer truncated: requested ({}, {}), available ({}, {})",
            n_benign,
            n_malignant,
            benign.len(),
            malignant.len()
        );
    }

    let mut subset: Vec<_> = benign
        .into_iter()
        .take(n_benign)
        .chain(malignant.into_iter().take(n_malignant))
        .collect();
    subset.shuffle(rng);
    subset
}
