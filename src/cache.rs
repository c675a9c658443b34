use std::collections::BTreeMap;

/// Memoized results keyed by operation name and the data generation they
/// were computed from. Bumping the generation makes every entry unreachable.
#[derive(Debug, Clone, Default)]
pub struct Memo<V> {
    generation: u64,
    entries: BTreeMap<(&'static str, u64), V>,
}

impl<V: Clone> Memo<V> {
    pub fn new() -> Self {
        Self {
            generation: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, operation: &'static str) -> Option<V> {
        self.entries.get(&(operation, self.generation)).cloned()
    }

    pub fn insert(&mut self, operation: &'static str, value: V) {
        self.entries.insert((operation, self.generation), value);
    }

    /// Drops everything computed so far.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.entries.clear();
    }
}
