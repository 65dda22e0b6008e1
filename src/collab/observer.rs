use log::info;
use ndarray::Array2;

/// Receives the state after every iteration. Nothing is read back.
pub trait Observer {
    fn report(&mut self, iteration: usize, s: &Array2<f64>, t: &Array2<f64>, objective: f64);
}

impl<F> Observer for F
where
    F: FnMut(usize, &Array2<f64>, &Array2<f64>, f64),
{
    fn report(&mut self, iteration: usize, s: &Array2<f64>, t: &Array2<f64>, objective: f64) {
        self(iteration, s, t, objective)
    }
}

/// Logs the objective every `every` iterations
pub struct LoggingObserver {
    every: usize,
    last: Option<f64>,
}

impl LoggingObserver {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
            last: None,
        }
    }
}

impl Observer for LoggingObserver {
    fn report(&mut self, iteration: usize, s: &Array2<f64>, t: &Array2<f64>, objective: f64) {
        if iteration % self.every == 0 {
            let change = self.last.map(|prev| objective - prev).unwrap_or(0.0);
            info!(
                "iteration {:>5}: objective {:.6e} (change {:+.3e}), |S|_1 = {:.3e}, |T|_1 = {:.3e}",
                iteration,
                objective,
                change,
                s.sum(),
                t.sum()
            );
        }
        self.last = Some(objective);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_observer() {
        let mut seen = Vec::new();
        {
            let mut obs = |i: usize, _: &Array2<f64>, _: &Array2<f64>, v: f64| seen.push((i, v));
            let s = Array2::zeros((2, 1));
            let t = Array2::zeros((1, 3));
            obs.report(0, &s, &t, 1.5);
            obs.report(1, &s, &t, 1.25);
        }
        assert_eq!(seen, vec![(0, 1.5), (1, 1.25)]);
    }

    #[test]
    fn test_logging_observer_tracks_last_value() {
        let mut obs = LoggingObserver::new(0);
        let s = Array2::ones((2, 1));
        let t = Array2::ones((1, 2));
        obs.report(0, &s, &t, 2.0);
        obs.report(1, &s, &t, 1.0);
        assert_eq!(obs.last, Some(1.0));
        assert_eq!(obs.every, 1);
    }
}
