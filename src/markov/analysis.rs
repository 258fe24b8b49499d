use serde::Serialize;

use super::chain::MarkovChain;

/// Tolerance for treating `P[i][i]` as exactly one.
const ABSORBING_EPSILON: f64 = 1e-12;

/// A maximal set of mutually reachable states.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunicatingClass {
    pub states: Vec<String>,
    /// No positive-probability transition leaves the class (recurrent).
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainClassification {
    pub irreducible: bool,
    pub aperiodic: bool,
    pub ergodic: bool,
    pub absorbing_states: Vec<String>,
    /// Exact period, for irreducible chains only.
    pub period: Option<usize>,
    pub classes: Vec<CommunicatingClass>,
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 { a } else { gcd(b, a % b) }
}

impl MarkovChain {
    /// States reachable in one step with positive probability.
    fn successors(&self, i: usize) -> Vec<usize> {
        self.transition_matrix()
            .row(i)
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p > 0.0)
            .map(|(j, _)| j)
            .collect()
    }

    /// States reachable from `start` in zero or more steps.
    fn reachable_from(&self, start: usize) -> Vec<bool> {
        let mut seen = vec![false; self.len()];
        let mut stack = vec![start];
        seen[start] = true;
        while let Some(i) = stack.pop() {
            for j in self.successors(i) {
                if !seen[j] {
                    seen[j] = true;
                    stack.push(j);
                }
            }
        }
        seen
    }

    /// Every state can reach every other state.
    pub fn is_irreducible(&self) -> bool {
        (0..self.len()).all(|i| self.reachable_from(i).iter().all(|&r| r))
    }

    /// Approximation: at least one state has a self-loop. Sufficient for an
    /// irreducible chain to be aperiodic, but not necessary; see
    /// [`period`](Self::period) for the exact test.
    pub fn is_aperiodic(&self) -> bool {
        let p = self.transition_matrix();
        (0..self.len()).any(|i| p[[i, i]] > 0.0)
    }

    pub fn is_ergodic(&self) -> bool {
        self.is_irreducible() && self.is_aperiodic()
    }

    pub fn absorbing_states(&self) -> Vec<&str> {
        let p = self.transition_matrix();
        (0..self.len())
            .filter(|&i| (p[[i, i]] - 1.0).abs() < ABSORBING_EPSILON)
            .map(|i| self.states()[i].as_str())
            .collect()
    }

    /// The period of an irreducible chain: the GCD of all cycle lengths,
    /// computed from BFS levels as `gcd(level[u] + 1 - level[v])` over edges.
    /// `None` when the chain is reducible.
    pub fn period(&self) -> Option<usize> {
        if self.is_empty() || !self.is_irreducible() {
            return None;
        }
        let mut level: Vec<Option<usize>> = vec![None; self.len()];
        level[0] = Some(0);
        let mut queue = std::collections::VecDeque::from([0]);
        let mut period = 0;
        while let Some(u) = queue.pop_front() {
            let lu = level[u].unwrap_or(0);
            for v in self.successors(u) {
                match level[v] {
                    None => {
                        level[v] = Some(lu + 1);
                        queue.push_back(v);
                    }
                    Some(lv) => period = gcd(period, (lu + 1).abs_diff(lv)),
                }
            }
        }
        Some(period.max(1))
    }

    /// Partition the states into communicating classes, in order of first
    /// appearance.
    pub fn communicating_classes(&self) -> Vec<CommunicatingClass> {
        let n = self.len();
        let reach: Vec<Vec<bool>> = (0..n).map(|i| self.reachable_from(i)).collect();
        let mut assigned = vec![false; n];
        let mut classes = Vec::new();
        for i in 0..n {
            if assigned[i] {
                continue;
            }
            let members: Vec<usize> = (0..n).filter(|&j| reach[i][j] && reach[j][i]).collect();
            for &m in &members {
                assigned[m] = true;
            }
            let closed = members
                .iter()
                .all(|&m| self.successors(m).iter().all(|j| members.contains(j)));
            classes.push(CommunicatingClass {
                states: members.iter().map(|&m| self.states()[m].clone()).collect(),
                closed,
            });
        }
        classes
    }

    pub fn classify(&self) -> ChainClassification {
        let irreducible = self.is_irreducible();
        let aperiodic = self.is_aperiodic();
        ChainClassification {
            irreducible,
            aperiodic,
            ergodic: irreducible && aperiodic,
            absorbing_states: self.absorbing_states().into_iter().map(String::from).collect(),
            period: self.period(),
            classes: self.communicating_classes(),
        }
    }
}
