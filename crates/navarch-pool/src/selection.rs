//! Provider selection strategies (§4.4): given a pool's configured provider
//! set, decide the order in which the evaluation loop should attempt
//! `provision` calls for one instance. The loop tries providers in the
//! returned order and stops at the first success — this gives `priority`
//! its literal semantics for free and lets the other strategies reuse the
//! same "ordered attempt list" shape.

use navarch_config::{ProviderSelection, ProviderSelectionStrategy};
use navarch_provider::Provider;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Per-pool selector state. Holds the round-robin cursor — the only piece
/// of selection state that must survive across ticks.
#[derive(Debug)]
pub struct ProviderSelector {
    selection: ProviderSelection,
    round_robin_cursor: AtomicUsize,
}

impl ProviderSelector {
    pub fn new(selection: ProviderSelection) -> Self {
        Self { selection, round_robin_cursor: AtomicUsize::new(0) }
    }

    /// Build the ordered attempt list for the next provision call.
    /// `providers` maps provider name to its implementation; entries for
    /// names not present in the map are skipped (a configuration-resolution
    /// invariant elsewhere guarantees every referenced name exists, but this
    /// stays defensive against a provider unregistered at runtime).
    pub async fn attempt_order(
        &self,
        providers: &HashMap<String, Arc<dyn Provider>>,
    ) -> Vec<Arc<dyn Provider>> {
        let names = &self.selection.provider_names;
        if names.is_empty() {
            return Vec::new();
        }

        let ordered_names: Vec<String> = match self.selection.strategy {
            ProviderSelectionStrategy::Priority => names.clone(),
            ProviderSelectionStrategy::RoundRobin => self.round_robin_order(names),
            ProviderSelectionStrategy::Weighted => self.weighted_order(names),
            ProviderSelectionStrategy::Cost => self.cost_order(names),
            ProviderSelectionStrategy::Availability => self.availability_order(names, providers).await,
        };

        ordered_names.into_iter().filter_map(|name| providers.get(&name).cloned()).collect()
    }

    /// Rotate the provider list starting at the cursor, then advance it by
    /// one so the next provision call starts from the next provider.
    fn round_robin_order(&self, names: &[String]) -> Vec<String> {
        let len = names.len();
        let start = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % len;
        (0..len).map(|i| names[(start + i) % len].clone()).collect()
    }

    /// A deterministic weighted round-robin: walk the cursor through a
    /// virtual sequence proportional to each provider's weight (e.g.
    /// weights [3, 1] produce the repeating sequence A A A B), then use that
    /// position to pick the primary attempt, falling back to the remaining
    /// providers by descending weight.
    fn weighted_order(&self, names: &[String]) -> Vec<String> {
        let weights = &self.selection.weights;
        let total_weight: u32 = weights.iter().sum::<u32>().max(1);
        let position = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) as u32 % total_weight;

        let mut cumulative = 0u32;
        let mut primary_index = 0;
        for (i, w) in weights.iter().enumerate() {
            cumulative += w.max(&1);
            if position < cumulative {
                primary_index = i;
                break;
            }
        }

        let mut order: Vec<(usize, u32)> =
            names.iter().enumerate().map(|(i, _)| (i, weights.get(i).copied().unwrap_or(1))).collect();
        order.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let mut result: Vec<String> = vec![names[primary_index].clone()];
        for (i, _) in order {
            if i != primary_index {
                result.push(names[i].clone());
            }
        }
        result
    }

    /// No cost data source is wired into the core (§4.4: "implementation
    /// may use instance-type listings where available"); absent one, this
    /// degrades to the pool's declared provider order, which is still
    /// deterministic given its inputs.
    fn cost_order(&self, names: &[String]) -> Vec<String> {
        names.to_vec()
    }

    /// Prefer the provider currently listing the fewest live instances
    /// (most spare capacity), breaking ties by declared order.
    async fn availability_order(
        &self,
        names: &[String],
        providers: &HashMap<String, Arc<dyn Provider>>,
    ) -> Vec<String> {
        let mut counts: Vec<(String, usize)> = Vec::with_capacity(names.len());
        for name in names {
            let count = match providers.get(name) {
                Some(provider) => provider.list().await.map(|l| l.len()).unwrap_or(usize::MAX),
                None => usize::MAX,
            };
            counts.push((name.clone(), count));
        }
        counts.sort_by(|a, b| a.1.cmp(&b.1));
        counts.into_iter().map(|(name, _)| name).collect()
    }
}
