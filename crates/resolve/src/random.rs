//! Deterministic-random resolution.

use crate::ResolveError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use taskforge_ir::{ResolvedModule, UnresolvedModule};
use tracing::debug;

/// Bind every tunable to an independent uniform draw from its domain.
///
/// A fixed seed is fully reproducible: the same seed and module always yield
/// the same assignment. With `seed = None` the generator is taken from
/// entropy and the result is not reproducible. This path never compiles or
/// measures anything; it is O(number of tunables).
pub fn random_resolve(
    module: &UnresolvedModule,
    seed: Option<u64>,
) -> Result<ResolvedModule, ResolveError> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut bindings = BTreeMap::new();
    for tunable in module.tunables() {
        let domain = tunable.domain();
        let value = domain[rng.gen_range(0..domain.len())];
        bindings.insert(tunable.name().to_string(), value);
    }
    debug!(module = module.name(), ?bindings, "randomly resolved module");
    Ok(module.bind(bindings)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_implement::ImplementerRegistry;
    use taskforge_ir::ops;

    fn split_module() -> UnresolvedModule {
        let registry = ImplementerRegistry::with_default_implementers();
        let task = ops::matmul(64, 64, 64).unwrap();
        registry.implement(&task, Some("grid_split")).unwrap()
    }

    #[test]
    fn same_seed_gives_identical_bindings() {
        let module = split_module();
        let a = random_resolve(&module, Some(42)).unwrap();
        let b = random_resolve(&module, Some(42)).unwrap();
        assert_eq!(a.bindings(), b.bindings());
    }

    #[test]
    fn different_seeds_eventually_differ() {
        let module = split_module();
        let base = random_resolve(&module, Some(0)).unwrap();
        let differs = (1..50u64)
            .any(|seed| random_resolve(&module, Some(seed)).unwrap().bindings() != base.bindings());
        assert!(differs);
    }

    #[test]
    fn bound_values_stay_inside_their_domains() {
        let module = split_module();
        for seed in 0..20 {
            let resolved = random_resolve(&module, Some(seed)).unwrap();
            for tunable in module.tunables() {
                let value = resolved.binding(tunable.name()).unwrap();
                assert!(tunable.domain().contains(&value));
            }
        }
    }

    #[test]
    fn unseeded_resolution_still_produces_a_full_assignment() {
        let module = split_module();
        let resolved = random_resolve(&module, None).unwrap();
        assert_eq!(resolved.bindings().len(), module.tunables().len());
    }
}
