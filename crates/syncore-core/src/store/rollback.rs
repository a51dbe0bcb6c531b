// ── Optimistic write bookkeeping ──

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::entry::CacheEntry;
use super::key::CacheKey;

pub(crate) type UpdateFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// One optimistic write applied to one entry.
pub(crate) struct Layer {
    pub id: u64,
    pub update: UpdateFn,
}

/// Outstanding optimistic writes on one entry, stacked over the entry as
/// it was before the first of them.
///
/// Any successful fetch discards the stack: server data supersedes every
/// layer. Removing a layer replays the remaining ones over the base, so
/// writes may fail in any order and the entry still ends up holding only
/// the writes that have not failed.
pub(crate) struct OptimisticStack {
    pub base: CacheEntry,
    pub layers: Vec<Layer>,
}

impl OptimisticStack {
    pub fn new(base: CacheEntry) -> Self {
        Self {
            base,
            layers: Vec::new(),
        }
    }

    /// Remove layer `id`. Returns `false` if it is not on this stack.
    pub fn remove(&mut self, id: u64) -> bool {
        let Some(pos) = self.layers.iter().position(|l| l.id == id) else {
            return false;
        };
        self.layers.remove(pos);
        true
    }

    /// Base data with every remaining layer applied in write order.
    pub fn replay(&self) -> Option<Value> {
        self.base.data.as_deref().map(|base| {
            self.layers
                .iter()
                .fold(base.clone(), |acc, layer| (layer.update)(&acc))
        })
    }
}

impl fmt::Debug for OptimisticStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticStack")
            .field("key", &self.base.key)
            .field("layers", &self.layers.iter().map(|l| l.id).collect::<Vec<_>>())
            .finish()
    }
}

/// The entry an optimistic write touched and the layer it pushed there.
#[derive(Debug, Clone)]
pub(crate) struct SavedEntry {
    pub key: CacheKey,
    pub layer: u64,
}

/// Identifies the layers one optimistic write pushed so they can be
/// removed again.
///
/// Returned by [`QueryCache::set_query_data`](crate::QueryCache::set_query_data)
/// and consumed by [`QueryCache::rollback`](crate::QueryCache::rollback).
#[derive(Debug, Clone, Default)]
#[must_use = "dropping a rollback token keeps the optimistic write until the next fetch"]
pub struct RollbackToken {
    pub(crate) saved: Vec<SavedEntry>,
}

impl RollbackToken {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fold another token into this one. Entries are restored in reverse
    /// write order.
    pub fn merge(mut self, other: RollbackToken) -> Self {
        self.saved.extend(other.saved);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }

    pub fn len(&self) -> usize {
        self.saved.len()
    }

    /// Keys touched by the optimistic write.
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.saved.iter().map(|s| &s.key)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn push(stack: &mut OptimisticStack, id: u64, code: &'static str) {
        stack.layers.push(Layer {
            id,
            update: Arc::new(move |rows| {
                let mut rows = rows.as_array().cloned().unwrap_or_default();
                rows.push(json!(code));
                Value::Array(rows)
            }),
        });
    }

    #[test]
    fn removing_a_middle_layer_replays_the_rest() {
        let mut base = CacheEntry::idle(CacheKey::named("devises"), Duration::ZERO);
        base.data = Some(Arc::new(json!(["USD"])));
        let mut stack = OptimisticStack::new(base);
        push(&mut stack, 1, "EUR");
        push(&mut stack, 2, "XOF");
        push(&mut stack, 3, "GBP");
        assert_eq!(stack.replay().unwrap(), json!(["USD", "EUR", "XOF", "GBP"]));

        assert!(stack.remove(2));
        assert!(!stack.remove(2));
        assert_eq!(stack.replay().unwrap(), json!(["USD", "EUR", "GBP"]));
    }
}
