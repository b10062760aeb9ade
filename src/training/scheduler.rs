use serde::{Deserialize, Serialize};

/// Step decay at fixed epoch milestones, advanced once per epoch.
///
/// After `step()` has been called `e` times the rate is
/// `base_lr * gamma^k`, k being the number of milestones `<= e`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiStepLr {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
    last_epoch: usize,
}

impl MultiStepLr {
    pub fn new(base_lr: f64, milestones: Vec<usize>, gamma: f64) -> Self {
        Self {
            base_lr,
            milestones,
            gamma,
            last_epoch: 0,
        }
    }

    /// Rate for the current epoch
    pub fn lr(&self) -> f64 {
        let passed = self
            .milestones
            .iter()
            .filter(|&&m| m <= self.last_epoch)
            .count();
        self.base_lr * self.gamma.powi(passed as i32)
    }

    /// Moves to the next epoch and returns its rate.
    pub fn step(&mut self) -> f64 {
        self.last_epoch += 1;
        self.lr()
    }

    pub fn epochs_completed(&self) -> usize {
        self.last_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decays_at_each_milestone() {
        let mut sched = MultiStepLr::new(1.0, vec![2, 4], 0.1);
        let mut rates = vec![sched.lr()];
        for _ in 0..5 {
            rates.push(sched.step());
        }
        let expected = [1.0, 1.0, 0.1, 0.1, 0.01, 0.01];
        for (r, e) in rates.iter().zip(expected) {
            assert!((r - e).abs() < 1e-12, "{rates:?}");
        }
    }

    #[test]
    fn milestone_beyond_run_keeps_base_rate() {
        let mut sched = MultiStepLr::new(0.01, vec![100], 0.1);
        for _ in 0..30 {
            sched.step();
        }
        assert_eq!(sched.lr(), 0.01);
        assert_eq!(sched.epochs_completed(), 30);
    }
}
