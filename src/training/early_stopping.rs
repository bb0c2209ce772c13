//! Patience-based early stopping on validation loss.

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopSignal {
    /// New best loss; persist the model.
    Improved,
    NoImprovement { streak: usize },
    /// `patience` consecutive epochs without improvement.
    Stop,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    streak: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            streak: 0,
        }
    }

    /// Only a strictly lower loss counts as an improvement.
    pub fn observe(&mut self, loss: f64) -> StopSignal {
        let improved = match self.best {
            None => !loss.is_nan(),
            Some(best) => loss < best,
        };
        if improved {
            self.best = Some(loss);
            self.streak = 0;
            return StopSignal::Improved;
        }
        self.streak += 1;
        if self.streak >= self.patience {
            StopSignal::Stop
        } else {
            StopSignal::NoImprovement {
                streak: self.streak,
            }
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn streak(&self) -> usize {
        self.streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stops_after_exactly_patience_epochs() {
        let mut es = EarlyStopping::new(3);
        assert_eq!(es.observe(1.0), StopSignal::Improved);
        assert_eq!(es.observe(1.0), StopSignal::NoImprovement { streak: 1 });
        assert_eq!(es.observe(1.2), StopSignal::NoImprovement { streak: 2 });
        assert_eq!(es.observe(1.1), StopSignal::Stop);
        assert_eq!(es.best(), Some(1.0));
    }

    #[test]
    fn test_improvement_resets_streak() {
        let mut es = EarlyStopping::new(2);
        es.observe(0.9);
        es.observe(0.95);
        assert_eq!(es.observe(0.5), StopSignal::Improved);
        assert_eq!(es.streak(), 0);
        assert_eq!(es.observe(0.6), StopSignal::NoImprovement { streak: 1 });
    }

    #[test]
    fn test_zero_patience_stops_on_first_miss() {
        let mut es = EarlyStopping::new(0);
        assert_eq!(es.observe(0.5), StopSignal::Improved);
        assert_eq!(es.observe(0.7), StopSignal::Stop);
    }
}
