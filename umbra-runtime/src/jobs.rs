// Startup job queue: per-assembly work that runs once after load.
//
// Each assembly's queue is removed from the map before it is drained, so
// concurrent or repeated runs for the same assembly find nothing to do.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::ffi_guard::panic_message;

pub type StartupJob = Box<dyn FnOnce() + Send>;

/// Outcome of one drain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub ran: usize,
    pub failures: Vec<String>,
}

impl JobReport {
    pub fn succeeded(&self) -> usize {
        self.ran - self.failures.len()
    }
}

#[derive(Default)]
pub struct StartupJobs {
    queues: Mutex<HashMap<String, Vec<StartupJob>>>,
}

impl StartupJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, assembly: &str, job: impl FnOnce() + Send + 'static) {
        self.register_boxed(assembly, Box::new(job));
    }

    pub(crate) fn register_boxed(&self, assembly: &str, job: StartupJob) {
        self.queues.lock().entry(assembly.to_string()).or_default().push(job);
    }

    /// Run every queued job of `assembly` in registration order. A panicking
    /// job is logged and recorded; the remaining jobs still run.
    pub fn run_for_assembly(&self, assembly: &str) -> JobReport {
        let Some(jobs) = self.queues.lock().remove(assembly) else {
            return JobReport::default();
        };
        let mut report = JobReport::default();
        for (index, job) in jobs.into_iter().enumerate() {
            report.ran += 1;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                let msg = format!("startup job {index} of `{assembly}` panicked: {}", panic_message(&*payload));
                log::error!("{msg}");
                report.failures.push(msg);
            }
        }
        log::debug!("`{assembly}`: ran {} startup jobs", report.ran);
        report
    }

    pub fn has_jobs(&self, assembly: &str) -> bool {
        self.queues.lock().get(assembly).is_some_and(|q| !q.is_empty())
    }

    /// Drop queued jobs without running them.
    pub fn discard(&self, assembly: &str) -> usize {
        self.queues.lock().remove(assembly).map_or(0, |jobs| jobs.len())
    }
}

static STARTUP_JOBS: OnceLock<StartupJobs> = OnceLock::new();

/// The process-wide startup job queue.
pub fn startup_jobs() -> &'static StartupJobs {
    STARTUP_JOBS.get_or_init(StartupJobs::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn jobs_run_once_in_order() {
        let jobs = StartupJobs::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            jobs.register("Game", move || log.lock().push(i));
        }
        assert!(jobs.has_jobs("Game"));
        assert_eq!(jobs.run_for_assembly("Game").ran, 3);
        assert_eq!(jobs.run_for_assembly("Game"), JobReport::default());
        assert!(!jobs.has_jobs("Game"));
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn panicking_job_does_not_stop_the_rest() {
        let jobs = StartupJobs::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        jobs.register("Flaky", || panic!("bad binding"));
        jobs.register("Flaky", move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let report = jobs.run_for_assembly("Flaky");
        assert_eq!(report.ran, 2);
        assert_eq!(report.succeeded(), 1);
        assert!(report.failures[0].contains("bad binding"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn assemblies_are_isolated() {
        let jobs = StartupJobs::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        jobs.register("A", move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        jobs.register("B", || {});
        jobs.run_for_assembly("B");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(jobs.has_jobs("A"));
        assert_eq!(jobs.discard("A"), 1);
        assert_eq!(jobs.run_for_assembly("A").ran, 0);
    }
}
