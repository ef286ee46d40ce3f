//! [`HashMap`] and [`HashSet`] based on [hashbrown]'s implementations,
//! defaulting to [`FixedHasher`] instead of a random state.
//! Scheduling must be reproducible run to run, so every map the scheduler
//! iterates has a deterministic order of growth and a fixed hash seed.

use crate::hash::FixedHasher;

pub type HashMap<K, V, S = FixedHasher> = hashbrown::HashMap<K, V, S>;

pub type HashSet<T, S = FixedHasher> = hashbrown::HashSet<T, S>;
