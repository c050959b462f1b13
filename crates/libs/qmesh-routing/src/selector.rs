//! Action selection over a destination's next-hop candidates.

use rand::Rng;

use qmesh_wire::MacAddr;

/// Strategy for picking a next hop from `{mac → estimated value}`.
///
/// Selection is deterministic given a seeded RNG; ties in the greedy branch
/// break on first iteration order (entries keep insertion order).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selector {
    Greedy,
    EpsilonGreedy { epsilon: f64 },
    SoftMax { tau: f64 },
}

impl Default for Selector {
    fn default() -> Self {
        Selector::EpsilonGreedy { epsilon: 0.1 }
    }
}

impl Selector {
    pub fn select<R: Rng>(&self, actions: &[(MacAddr, f64)], rng: &mut R) -> Option<MacAddr> {
        if actions.is_empty() {
            return None;
        }
        match *self {
            Selector::Greedy => greedy(actions),
            Selector::EpsilonGreedy { epsilon } => {
                if actions.len() == 1 || rng.gen::<f64>() >= epsilon {
                    return greedy(actions);
                }
                let best = greedy(actions)?;
                let rest: Vec<MacAddr> =
                    actions.iter().map(|(mac, _)| *mac).filter(|mac| *mac != best).collect();
                Some(rest[rng.gen_range(0..rest.len())])
            }
            Selector::SoftMax { tau } => {
                let weights: Vec<f64> = actions.iter().map(|(_, v)| (v / tau).exp()).collect();
                let total: f64 = weights.iter().sum();
                if !total.is_finite() || total <= 0.0 {
                    return greedy(actions);
                }
                let mut roll = rng.gen::<f64>() * total;
                for ((mac, _), weight) in actions.iter().zip(&weights) {
                    roll -= weight;
                    if roll <= 0.0 {
                        return Some(*mac);
                    }
                }
                actions.last().map(|(mac, _)| *mac)
            }
        }
    }
}

fn greedy(actions: &[(MacAddr, f64)]) -> Option<MacAddr> {
    let mut best: Option<(MacAddr, f64)> = None;
    for (mac, value) in actions {
        match best {
            Some((_, best_value)) if *value <= best_value => {}
            _ => best = Some((*mac, *value)),
        }
    }
    best.map(|(mac, _)| mac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0x02, 0, 0, 0, 0, last])
    }

    fn actions() -> Vec<(MacAddr, f64)> {
        vec![(mac(1), 10.0), (mac(2), 50.0), (mac(3), 30.0)]
    }

    #[test]
    fn greedy_picks_strict_maximum() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(Selector::Greedy.select(&actions(), &mut rng), Some(mac(2)));
    }

    #[test]
    fn greedy_breaks_ties_by_first_iteration_order() {
        let mut rng = StdRng::seed_from_u64(1);
        let tied = vec![(mac(1), 50.0), (mac(2), 50.0)];
        assert_eq!(Selector::Greedy.select(&tied, &mut rng), Some(mac(1)));
    }

    #[test]
    fn empty_map_returns_none() {
        let mut rng = StdRng::seed_from_u64(1);
        for selector in [
            Selector::Greedy,
            Selector::EpsilonGreedy { epsilon: 0.1 },
            Selector::SoftMax { tau: 1.0 },
        ] {
            assert_eq!(selector.select(&[], &mut rng), None);
        }
    }

    #[test]
    fn epsilon_zero_is_greedy() {
        let mut rng = StdRng::seed_from_u64(7);
        let selector = Selector::EpsilonGreedy { epsilon: 0.0 };
        for _ in 0..50 {
            assert_eq!(selector.select(&actions(), &mut rng), Some(mac(2)));
        }
    }

    #[test]
    fn epsilon_one_explores_non_greedy_actions() {
        let mut rng = StdRng::seed_from_u64(7);
        let selector = Selector::EpsilonGreedy { epsilon: 1.0 };
        for _ in 0..50 {
            let pick = selector.select(&actions(), &mut rng).unwrap();
            assert_ne!(pick, mac(2));
        }
    }

    #[test]
    fn epsilon_greedy_single_action_falls_back_to_greedy() {
        let mut rng = StdRng::seed_from_u64(7);
        let selector = Selector::EpsilonGreedy { epsilon: 1.0 };
        let single = vec![(mac(9), 1.0)];
        assert_eq!(selector.select(&single, &mut rng), Some(mac(9)));
    }

    #[test]
    fn softmax_prefers_heavier_actions() {
        let mut rng = StdRng::seed_from_u64(42);
        let selector = Selector::SoftMax { tau: 1.0 };
        let skewed = vec![(mac(1), 0.0), (mac(2), 20.0)];
        let mut hits = 0;
        for _ in 0..200 {
            if selector.select(&skewed, &mut rng) == Some(mac(2)) {
                hits += 1;
            }
        }
        assert!(hits > 190, "softmax picked the heavy action only {hits}/200 times");
    }

    #[test]
    fn softmax_is_deterministic_under_a_fixed_seed() {
        let selector = Selector::SoftMax { tau: 1.0 };
        let a: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(3);
            (0..20).map(|_| selector.select(&actions(), &mut rng)).collect()
        };
        let b: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(3);
            (0..20).map(|_| selector.select(&actions(), &mut rng)).collect()
        };
        assert_eq!(a, b);
    }
}
