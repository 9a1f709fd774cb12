/*!
 * Per-job deadline timers.
 *
 * A timer fires its callback at most once. Firing only notifies; the running
 * operation is not interrupted. Disarming after the job leaves PROCESSING
 * guarantees a late timer never reaches an already finished job.
 */

use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::models::short_id;

struct ArmedTimer {
    token: u64,
    abort: AbortHandle,
}

/// Deadline timers keyed by job identifier
pub struct TimeoutController {
    handle: Handle,
    timers: Arc<Mutex<HashMap<String, ArmedTimer>>>,
    next_token: AtomicU64,
}

impl TimeoutController {
    /// Create a controller spawning its timers on the given runtime
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
        }
    }

    /// Start a timer for `id`, replacing any timer already armed for it
    pub fn arm<F>(&self, id: &str, duration: Duration, on_timeout: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let job_id = id.to_string();

        // Held across the spawn so the timer cannot look itself up before it is inserted
        let mut armed = self.timers.lock();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(duration).await;

            let fired = {
                let mut timers = timers.lock();
                match timers.get(&job_id) {
                    Some(timer) if timer.token == token => {
                        timers.remove(&job_id);
                        true
                    }
                    _ => false,
                }
            };

            if fired {
                debug!("Timer for job {} fired after {:?}", short_id(&job_id), duration);
                on_timeout();
            }
        });

        let timer = ArmedTimer {
            token,
            abort: task.abort_handle(),
        };
        if let Some(previous) = armed.insert(id.to_string(), timer) {
            previous.abort.abort();
        }
        debug!("Armed {:?} timer for job {}", duration, short_id(id));
    }

    /// Cancel the timer for `id`. Returns whether one was armed.
    pub fn disarm(&self, id: &str) -> bool {
        match self.timers.lock().remove(id) {
            Some(timer) => {
                timer.abort.abort();
                debug!("Disarmed timer for job {}", short_id(id));
                true
            }
            None => false,
        }
    }

    /// Cancel every timer
    pub fn disarm_all(&self) -> usize {
        let mut timers = self.timers.lock();
        let count = timers.len();
        for (_, timer) in timers.drain() {
            timer.abort.abort();
        }
        count
    }

    /// Whether a timer is armed for `id`
    pub fn is_armed(&self, id: &str) -> bool {
        self.timers.lock().contains_key(id)
    }

    /// Number of armed timers
    pub fn armed_count(&self) -> usize {
        self.timers.lock().len()
    }
}
