// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Load balancing between processors.
//!
//! Runs at the top of every scheduling pass. First the global deque is
//! drained into the local one. Only if that brought nothing and the local
//! deque is empty does the processor steal: it picks the sibling with the
//! longest deque (by unlocked size hint) and takes half of it, rounded
//! down, from the victim's head.

use tracing::debug;

use super::processor::Counters;
use super::scheduler::Shared;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BalanceOutcome {
    pub drained: usize,
    pub stolen: usize,
    pub victim: Option<usize>,
}

pub(crate) fn load_balance(shared: &Shared, id: usize) -> BalanceOutcome {
    let me = &shared.processors[id];
    let mut outcome = BalanceOutcome::default();

    // Bounded by the length seen now so a steady stream of injections
    // cannot keep this processor draining forever.
    for _ in 0..shared.global.len() {
        let Some(key) = shared.global.pop_head() else {
            break;
        };
        me.ready.push_tail(key);
        outcome.drained += 1;
    }
    if outcome.drained > 0 {
        Counters::bump(&me.counters.drained, outcome.drained as u64);
        return outcome;
    }

    if me.ready.len_hint() > 0 {
        return outcome;
    }

    let Some((victim, max)) = shared
        .processors
        .iter()
        .filter(|p| p.id != id)
        .map(|p| (p.id, p.ready.len_hint()))
        .max_by_key(|&(_, len)| len)
    else {
        return outcome;
    };

    let want = max / 2;
    if want == 0 {
        return outcome;
    }

    let from = &shared.processors[victim].ready;
    for _ in 0..want {
        // The hint may be stale; stop at the first miss.
        let Some(key) = from.pop_head() else {
            break;
        };
        me.ready.push_tail(key);
        outcome.stolen += 1;
    }
    if outcome.stolen > 0 {
        outcome.victim = Some(victim);
        Counters::bump(&me.counters.stolen, outcome.stolen as u64);
        debug!(
            processor = id,
            victim,
            stolen = outcome.stolen,
            "stole tasks"
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::green::scheduler::Target;
    use std::sync::Arc;

    fn shared(n: usize) -> Arc<Shared> {
        Shared::new(
            RuntimeConfig::default()
                .processors(n)
                .stack_size(64 * 1024),
        )
        .unwrap()
    }

    fn fill(shared: &Shared, target: Target, n: usize) {
        for _ in 0..n {
            shared.create(target, |()| (), (), None).unwrap();
        }
    }

    #[test]
    fn single_task_is_not_stolen() {
        let shared = shared(2);
        fill(&shared, Target::Local(1), 1);
        let outcome = load_balance(&shared, 0);
        assert_eq!(outcome, BalanceOutcome::default());
        assert_eq!(shared.processors[1].ready.len(), 1);
        shared.teardown();
    }

    #[test]
    fn steals_half_rounded_down_from_busiest() {
        let shared = shared(3);
        fill(&shared, Target::Local(1), 2);
        fill(&shared, Target::Local(2), 5);
        let outcome = load_balance(&shared, 0);
        assert_eq!(outcome.stolen, 2);
        assert_eq!(outcome.victim, Some(2));
        assert_eq!(shared.processors[0].ready.len(), 2);
        assert_eq!(shared.processors[2].ready.len(), 3);
        assert_eq!(shared.processors[0].stats().stolen, 2);
        shared.teardown();
    }

    #[test]
    fn steals_from_head_keeping_order() {
        let shared = shared(2);
        fill(&shared, Target::Local(1), 4);
        let victim_head = shared.processors[1].ready.pop_head().unwrap();
        shared.processors[1].ready.push_tail(victim_head);
        // Deque is now [b, c, d, a]; the thief takes b and c.
        let outcome = load_balance(&shared, 0);
        assert_eq!(outcome.stolen, 2);
        let first = shared.processors[0].ready.pop_head().unwrap();
        let second = shared.processors[0].ready.pop_head().unwrap();
        assert!(first.index() < second.index());
        assert_ne!(first, victim_head);
        shared.teardown();
    }

    #[test]
    fn draining_global_skips_stealing() {
        let shared = shared(2);
        fill(&shared, Target::Local(1), 4);
        fill(&shared, Target::Global, 3);
        let outcome = load_balance(&shared, 0);
        assert_eq!(outcome.drained, 3);
        assert_eq!(outcome.stolen, 0);
        assert_eq!(shared.global.len(), 0);
        assert_eq!(shared.processors[1].ready.len(), 4);
        shared.teardown();
    }

    #[test]
    fn busy_processor_does_not_steal() {
        let shared = shared(2);
        fill(&shared, Target::Local(0), 1);
        fill(&shared, Target::Local(1), 6);
        let outcome = load_balance(&shared, 0);
        assert_eq!(outcome, BalanceOutcome::default());
        shared.teardown();
    }

    #[test]
    fn lone_processor_has_no_victim() {
        let shared = shared(1);
        assert_eq!(load_balance(&shared, 0), BalanceOutcome::default());
        shared.teardown();
    }
}
