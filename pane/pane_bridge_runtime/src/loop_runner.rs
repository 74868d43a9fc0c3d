use std::future::Future;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::runtime::{Builder, Handle};
use tokio::sync::{oneshot, watch};

use crate::error::BridgeError;

/// Cooperative cancellation observed by background tasks at their
/// suspension points.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested or the loop handle is gone.
    pub async fn cancelled(&mut self) {
        loop {
            let cancelled = *self.0.borrow_and_update();
            if cancelled || self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

/// How a background loop ended during [`BackgroundLoop::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Graceful,
    Forced,
}

enum LoopExit {
    Finished,
    Forced,
}

/// Dropped as the last thing on the background thread, so the foreground can
/// wait for exit with a timeout.
struct ExitNotice(mpsc::Sender<()>);

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// A current-thread tokio runtime living on its own OS thread.
///
/// The thread is detached from process exit: nothing joins it unless
/// [`BackgroundLoop::shutdown`] is called.
#[derive(Debug)]
pub struct BackgroundLoop {
    thread_name: String,
    handle: Handle,
    thread: Option<JoinHandle<()>>,
    cancel_tx: watch::Sender<bool>,
    force_tx: Option<oneshot::Sender<()>>,
    exited_rx: mpsc::Receiver<()>,
}

/// Starts `task` on a fresh single-threaded scheduler on a new thread.
///
/// Returns once the scheduler exists and accepts spawned work.
pub fn spawn_threaded_event_loop<F, Fut>(
    thread_name: &str,
    task: F,
) -> Result<BackgroundLoop, BridgeError>
where
    F: FnOnce(CancelSignal) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + 'static,
{
    let (ready_tx, ready_rx) = mpsc::sync_channel(1);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (force_tx, force_rx) = oneshot::channel::<()>();
    let (exited_tx, exited_rx) = mpsc::channel();
    let name = thread_name.to_string();

    let thread = thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let _exited = ExitNotice(exited_tx);

            let runtime = match Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            if ready_tx.send(Ok(runtime.handle().clone())).is_err() {
                return;
            }

            let signal = CancelSignal(cancel_rx);
            let exit = runtime.block_on(async move {
                tokio::select! {
                    biased;
                    _ = force_rx => LoopExit::Forced,
                    () = task(signal) => LoopExit::Finished,
                }
            });

            match exit {
                LoopExit::Finished => tracing::debug!("background loop finished"),
                LoopExit::Forced => tracing::warn!("background loop stopped by force"),
            }

            // Dropping the runtime drops every task still scheduled on it.
            drop(runtime);
        })
        .map_err(BridgeError::RuntimeStart)?;

    let handle = ready_rx
        .recv()
        .map_err(|_| BridgeError::LoopStartAborted)?
        .map_err(BridgeError::RuntimeStart)?;

    tracing::debug!(thread = %name, "background loop ready");

    Ok(BackgroundLoop {
        thread_name: name,
        handle,
        thread: Some(thread),
        cancel_tx,
        force_tx: Some(force_tx),
        exited_rx,
    })
}

impl BackgroundLoop {
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Schedules `future` on the background scheduler from any thread.
    pub fn spawn<Fut>(&self, future: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        drop(self.handle.spawn(future));
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        CancelSignal(self.cancel_tx.subscribe())
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancels outstanding work and joins the thread.
    ///
    /// Waits `join_timeout` for a cooperative exit, then forces the scheduler
    /// to stop and waits `force_timeout` more. A thread that survives both is
    /// reported as [`BridgeError::TeardownStalled`] and left detached.
    pub fn shutdown(
        mut self,
        join_timeout: Duration,
        force_timeout: Duration,
    ) -> Result<Shutdown, BridgeError> {
        self.cancel_tx.send_replace(true);

        if self.wait_for_exit(join_timeout) {
            self.join()?;
            return Ok(Shutdown::Graceful);
        }

        tracing::warn!(
            thread = %self.thread_name,
            timeout = ?join_timeout,
            "background loop ignored cancellation; forcing shutdown"
        );
        if let Some(force_tx) = self.force_tx.take() {
            let _ = force_tx.send(());
        }

        if self.wait_for_exit(force_timeout) {
            self.join()?;
            return Ok(Shutdown::Forced);
        }

        let waited = join_timeout + force_timeout;
        tracing::error!(
            thread = %self.thread_name,
            waited = ?waited,
            "background thread is still alive after forced shutdown"
        );
        Err(BridgeError::TeardownStalled {
            thread: self.thread_name.clone(),
            waited,
        })
    }

    fn wait_for_exit(&self, timeout: Duration) -> bool {
        match self.exited_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    fn join(&mut self) -> Result<(), BridgeError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        thread.join().map_err(|_| BridgeError::LoopPanicked {
            thread: self.thread_name.clone(),
        })
    }
}

impl Drop for BackgroundLoop {
    fn drop(&mut self) {
        if self.thread.is_none() {
            return;
        }

        self.cancel_tx.send_replace(true);
        if let Some(force_tx) = self.force_tx.take() {
            let _ = force_tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn returns_handle_that_accepts_work() {
        let background = spawn_threaded_event_loop("test-loop", |mut cancel| async move {
            cancel.cancelled().await;
        })
        .expect("spawn loop");

        let (tx, rx) = mpsc::channel();
        let expected = background.thread_name().to_string();
        background.spawn(async move {
            let name = thread::current().name().map(str::to_string);
            let _ = tx.send(name);
        });

        let ran_on = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("spawned work ran");
        assert_eq!(ran_on.as_deref(), Some(expected.as_str()));

        background
            .shutdown(Duration::from_secs(3), Duration::from_secs(3))
            .expect("shutdown");
    }

    #[test]
    fn idle_loop_joins_without_forcing() {
        let background = spawn_threaded_event_loop("idle-loop", |mut cancel| async move {
            cancel.cancelled().await;
        })
        .expect("spawn loop");

        let started = Instant::now();
        let outcome = background
            .shutdown(Duration::from_secs(3), Duration::from_secs(3))
            .expect("shutdown");

        assert_eq!(outcome, Shutdown::Graceful);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn cancellation_reaches_spawned_work() {
        let background = spawn_threaded_event_loop("spawned-loop", |mut cancel| async move {
            cancel.cancelled().await;
        })
        .expect("spawn loop");

        let (tx, rx) = mpsc::channel();
        let mut cancel = background.cancel_signal();
        background.spawn(async move {
            cancel.cancelled().await;
            let _ = tx.send(());
        });

        let outcome = background
            .shutdown(Duration::from_secs(3), Duration::from_secs(3))
            .expect("shutdown");
        assert_eq!(outcome, Shutdown::Graceful);
        // Either observed cancellation or was dropped with the runtime.
        let _ = rx.recv_timeout(SHORT);
    }

    #[test]
    fn task_ignoring_cancellation_is_forced() {
        let background = spawn_threaded_event_loop("stubborn-loop", |_cancel| async move {
            std::future::pending::<()>().await;
        })
        .expect("spawn loop");

        let outcome = background.shutdown(SHORT, Duration::from_secs(3)).expect("shutdown");
        assert_eq!(outcome, Shutdown::Forced);
    }

    #[test]
    fn blocked_thread_is_reported_as_stalled() {
        let background = spawn_threaded_event_loop("blocked-loop", |_cancel| async move {
            thread::sleep(Duration::from_millis(500));
        })
        .expect("spawn loop");

        let err = background.shutdown(SHORT, SHORT).expect_err("stalled");
        match err {
            BridgeError::TeardownStalled { thread, waited } => {
                assert_eq!(thread, "blocked-loop");
                assert_eq!(waited, SHORT * 2);
            }
            other => panic!("expected stall, got {other:?}"),
        }
    }

    #[test]
    fn cancel_signal_reports_state() {
        let (tx, rx) = watch::channel(false);
        let signal = CancelSignal(rx);
        assert!(!signal.is_cancelled());
        tx.send_replace(true);
        assert!(signal.is_cancelled());
    }
}
