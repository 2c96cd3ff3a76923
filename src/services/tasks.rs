use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use log::{debug, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use crate::errors::ToolkitError::Canceled;
use crate::errors::ToolkitResult;

pub type UiTask = Box<dyn FnOnce() + Send>;

/// Runs callbacks on the thread that owns the UI.
pub trait UiDispatcher: Send + Sync {
    fn run_on_ui(&self, task: UiTask);
}

/// Channel backed [UiDispatcher]. Posted callbacks run when the UI thread calls
/// [UiQueue::drain] or [UiQueue::run_next].
pub struct UiQueue {
    sender: UnboundedSender<UiTask>,
    receiver: Mutex<UnboundedReceiver<UiTask>>,
}

impl UiQueue {
    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    fn try_next(&self) -> Option<UiTask> {
        let mut receiver = match self.receiver.lock() {
            Ok(receiver) => receiver,
            Err(poisoned) => poisoned.into_inner(),
        };
        receiver.try_recv().ok()
    }

    /// Run every callback posted so far, returning how many ran.
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while let Some(task) = self.try_next() {
            task();
            count += 1;
        }
        count
    }

    /// Wait up to `timeout` for one callback and run it. Returns whether one ran.
    ///
    /// Polls instead of blocking on the channel, so it is safe to call from a thread
    /// that is driving a tokio runtime.
    pub fn run_next(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(task) = self.try_next() {
                task();
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(Self::POLL_INTERVAL.min(deadline - now));
        }
    }
}

impl Default for UiQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UiDispatcher for UiQueue {
    fn run_on_ui(&self, task: UiTask) {
        // The receiver lives as long as self.
        if self.sender.send(task).is_err() {
            warn!("UI queue is closed, dropping callback");
        }
    }
}

/// Cancellation flag shared between whoever started a job and the worker running it.
#[derive(Clone, Debug, Default)]
pub struct ProgressMonitor {
    canceled: Arc<AtomicBool>,
}

impl ProgressMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }

    /// [Canceled] once [ProgressMonitor::cancel] has been called.
    pub fn check(&self) -> ToolkitResult<()> {
        if self.is_canceled() {
            Err(Canceled)
        } else {
            Ok(())
        }
    }
}

/// Run `work` on a worker thread and post `on_done` with its result to the UI.
///
/// Uses the tokio blocking pool when called inside a runtime, a plain thread otherwise.
/// Results of concurrent jobs reach the UI in completion order.
pub fn spawn_background<T, W, D>(dispatcher: Arc<dyn UiDispatcher>, monitor: ProgressMonitor, work: W, on_done: D)
where
    T: Send + 'static,
    W: FnOnce(&ProgressMonitor) -> ToolkitResult<T> + Send + 'static,
    D: FnOnce(ToolkitResult<T>) + Send + 'static,
{
    let job = move || {
        let result = match monitor.check() {
            Ok(()) => work(&monitor),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            debug!("Background job ended with an error: {}", e);
        }
        dispatcher.run_on_ui(Box::new(move || on_done(result)));
    };

    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(job);
        }
        Err(_) => {
            std::thread::spawn(job);
        }
    }
}

/// Async counterpart of [spawn_background]. Must be called inside a tokio runtime.
pub fn spawn_background_async<T, W, F, D>(dispatcher: Arc<dyn UiDispatcher>, monitor: ProgressMonitor, work: W, on_done: D) -> tokio::task::JoinHandle<()>
where
    T: Send + 'static,
    W: FnOnce(ProgressMonitor) -> F + Send + 'static,
    F: Future<Output = ToolkitResult<T>> + Send + 'static,
    D: FnOnce(ToolkitResult<T>) + Send + 'static,
{
    tokio::spawn(async move {
        let result = match monitor.check() {
            Ok(()) => work(monitor).await,
            Err(e) => Err(e),
        };
        dispatcher.run_on_ui(Box::new(move || on_done(result)));
    })
}
