use std::time::{Duration, Instant};

use log::info;

/// Logs how long a job ran when it goes out of scope, whatever the exit path.
pub struct RunTimer {
    name: String,
    start: Instant,
    on_finish: Option<Box<dyn FnOnce(Duration)>>,
}

impl RunTimer {
    pub fn start(name: &str) -> RunTimer {
        info!("Starting {}", name);
        RunTimer {
            name: name.to_string(),
            start: Instant::now(),
            on_finish: None,
        }
    }

    /// Also call `f` with the elapsed time when the timer is dropped.
    pub fn on_finish(mut self, f: impl FnOnce(Duration) + 'static) -> RunTimer {
        self.on_finish = Some(Box::new(f));
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for RunTimer {
    fn drop(&mut self) {
        let elapsed = self.elapsed();
        info!(
            "Finished {} in {:.3} seconds",
            self.name,
            elapsed.as_secs_f64()
        );
        if let Some(f) = self.on_finish.take() {
            f(elapsed);
        }
    }
}
