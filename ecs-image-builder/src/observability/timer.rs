use std::time::Instant;

/// Wall-clock timer for one step invocation.
#[derive(Debug)]
pub struct StepTimer {
    start: Instant,
    step: String,
}

impl StepTimer {
    /// Starts timing `step`.
    #[must_use]
    pub fn start(step: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            step: step.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the timed step.
    #[must_use]
    pub fn step(&self) -> &str {
        &self.step
    }

    /// Logs the duration at debug level under `phase` and returns it.
    pub fn finish(self, phase: &str) -> f64 {
        let duration_ms = self.elapsed_ms();
        tracing::debug!(step = %self.step, phase, duration_ms, "Step finished");
        duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_measures_elapsed_time() {
        let timer = StepTimer::start("create_instance");
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert_eq!(timer.step(), "create_instance");
        assert!(timer.finish("run") >= 5.0);
    }
}
