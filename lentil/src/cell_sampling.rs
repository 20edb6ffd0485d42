use crate::common::*;
use rand::Rng;

/// Draw `k` distinct cells uniformly at random from `0..n_obs`
///
/// * `n_obs` - number of cells
/// * `k` - sample size; must not exceed `n_obs`
/// * `rng` - random number generator
pub fn sample_cells<R>(n_obs: usize, k: usize, rng: &mut R) -> anyhow::Result<Vec<usize>>
where
    R: Rng + ?Sized,
{
    if k > n_obs {
        return Err(HvgError::SampleTooLarge {
            requested: k,
            available: n_obs,
        }
        .into());
    }
    if k < 2 {
        return Err(HvgError::SampleTooSmall(k).into());
    }

    let cells = rand::seq::index::sample(rng, n_obs, k).into_vec();
    info!("Sampled {} cells out of {}", cells.len(), n_obs);
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn sample_is_distinct_and_in_range() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let cells = sample_cells(1000, 300, &mut rng)?;
        assert_eq!(cells.len(), 300);
        assert!(cells.iter().all(|&c| c < 1000));
        assert_eq!(cells.iter().collect::<HashSet<_>>().len(), 300);
        Ok(())
    }

    #[test]
    fn whole_population_is_a_permutation() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let mut cells = sample_cells(50, 50, &mut rng)?;
        cells.sort_unstable();
        assert_eq!(cells, (0..50).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn oversized_sample_is_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = sample_cells(500, 10_000, &mut rng).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HvgError>(),
            Some(HvgError::SampleTooLarge {
                requested: 10_000,
                available: 500
            })
        ));
    }
}
