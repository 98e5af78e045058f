//! Synchronous façade over the async client.
//!
//! One current-thread tokio runtime carries every piece of network I/O. Before
//! polling starts, blocking calls drive that runtime directly on the calling
//! thread. Once a thread has entered [`Bridge::run_forever`], the runtime is
//! busy running the update loop there, so other threads hand their futures to
//! it through the runtime's injection queue and wait for the result. Calls
//! still in flight when the loop stops are aborted and fail with
//! [`Error::Stopped`].
//!
//! Calling [`Bridge::run_blocking`] from a thread that is currently driving
//! this bridge's loop would wait on itself forever; it is rejected with
//! [`Error::Reentrant`]. Threads belonging to other runtimes are fine.

use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

static NEXT_BRIDGE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Bridges whose loop the current thread is driving, innermost last.
    static DRIVING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Marks the current thread as driving a bridge's loop until dropped.
struct DriveGuard(u64);

impl DriveGuard {
    fn enter(bridge_id: u64) -> Self {
        DRIVING.with(|driving| driving.borrow_mut().push(bridge_id));
        Self(bridge_id)
    }
}

impl Drop for DriveGuard {
    fn drop(&mut self) {
        DRIVING.with(|driving| {
            let mut driving = driving.borrow_mut();
            if let Some(pos) = driving.iter().rposition(|&id| id == self.0) {
                driving.remove(pos);
            }
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Created,
    Connected,
    Polling,
    Stopping,
    Stopped,
}

pub struct Bridge {
    id: u64,
    runtime: Runtime,
    state: Mutex<BridgeState>,
    shutdown: CancellationToken,
    call_timeout: Option<Duration>,
    /// Calls marshaled onto the running loop. `None` once the loop is gone.
    scheduled: Mutex<Option<JoinSet<()>>>,
}

impl Bridge {
    pub fn new(call_timeout: Option<Duration>) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::io("Failed to build event loop", e))?;
        Ok(Self {
            id: NEXT_BRIDGE_ID.fetch_add(1, Ordering::Relaxed),
            runtime,
            state: Mutex::new(BridgeState::Created),
            shutdown: CancellationToken::new(),
            call_timeout,
            scheduled: Mutex::new(Some(JoinSet::new())),
        })
    }

    pub fn state(&self) -> BridgeState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run the client handshake and move to `Connected`.
    pub fn connect<F, T>(&self, handshake: F) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.state();
        if state != BridgeState::Created {
            return Err(Error::InvalidState {
                operation: "connect",
                state,
            });
        }
        let api = self.run_blocking(async move {
            handshake
                .await
                .map_err(|e| Error::network("Failed to connect", e))
        })?;
        self.transition(BridgeState::Created, BridgeState::Connected, "connect")?;
        info!("Connected to Telegram");
        Ok(api)
    }

    /// Execute `op` on the event loop and block until it completes.
    pub fn run_blocking<F, T>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.on_loop_thread() {
            error!("run_blocking called from inside the event loop");
            return Err(Error::Reentrant);
        }

        match self.state() {
            BridgeState::Created | BridgeState::Connected => self.drive(op),
            BridgeState::Polling => self.schedule(op),
            BridgeState::Stopping | BridgeState::Stopped => Err(Error::Stopped),
        }
    }

    fn schedule<F, T>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        {
            let mut scheduled = self.scheduled.lock().unwrap_or_else(|e| e.into_inner());
            let Some(tasks) = scheduled.as_mut() else {
                return Err(Error::Stopped);
            };
            while tasks.try_join_next().is_some() {}
            tasks.spawn_on(
                async move {
                    // The caller may have timed out already.
                    let _ = tx.send(op.await);
                },
                self.runtime.handle(),
            );
        }

        match self.call_timeout {
            Some(timeout) => rx.recv_timeout(timeout).map_err(|e| match e {
                mpsc::RecvTimeoutError::Timeout => Error::Timeout(timeout),
                mpsc::RecvTimeoutError::Disconnected => Error::Stopped,
            })?,
            None => rx.recv().map_err(|_| Error::Stopped)?,
        }
    }

    /// Drive `event_loop` on the calling thread until it returns.
    ///
    /// The loop receives the shutdown token and must return once it is
    /// cancelled. Marshaled calls still running at that point are aborted.
    /// The bridge is `Stopped` afterwards, whatever the outcome.
    pub fn run_forever<F, Fut>(&self, event_loop: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.on_loop_thread() {
            return Err(Error::Reentrant);
        }
        self.transition(BridgeState::Connected, BridgeState::Polling, "start polling")?;
        info!("Polling started");

        let result = self.drive(event_loop(self.shutdown.clone()));
        self.abort_scheduled();

        self.set_state(BridgeState::Stopped);
        info!("Polling stopped");
        result
    }

    /// Ask the event loop to stop. Returns the state the bridge was in.
    ///
    /// From `Polling` this only signals the loop; the thread inside
    /// [`Bridge::run_forever`] finishes the teardown. From any earlier state
    /// the bridge goes straight to `Stopping` and the caller is expected to
    /// tear down and call [`Bridge::finish_stop`].
    pub fn request_stop(&self) -> BridgeState {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let previous = *state;
            if matches!(
                previous,
                BridgeState::Created | BridgeState::Connected | BridgeState::Polling
            ) {
                *state = BridgeState::Stopping;
            }
            previous
        };
        if previous != BridgeState::Stopped {
            debug!(?previous, "Stop requested");
            self.shutdown.cancel();
        }
        previous
    }

    /// Drive a teardown future while `Stopping`, then mark the bridge stopped.
    pub fn finish_stop<F>(&self, teardown: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let result = self.drive(teardown);
        self.set_state(BridgeState::Stopped);
        result
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn on_loop_thread(&self) -> bool {
        DRIVING.with(|driving| driving.borrow().contains(&self.id))
    }

    fn drive<F: Future>(&self, future: F) -> F::Output {
        let _guard = DriveGuard::enter(self.id);
        self.runtime.block_on(future)
    }

    /// Close the scheduling queue and abort whatever is left on it. Aborted
    /// calls drop their result sender, so waiting callers get `Stopped`.
    fn abort_scheduled(&self) {
        let tasks = self
            .scheduled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut tasks) = tasks else {
            return;
        };
        if !tasks.is_empty() {
            debug!(pending = tasks.len(), "Aborting in-flight calls");
        }
        tasks.abort_all();
        self.drive(async move { while tasks.join_next().await.is_some() {} });
    }

    fn transition(
        &self,
        from: BridgeState,
        to: BridgeState,
        operation: &'static str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != from {
            return Err(Error::InvalidState {
                operation,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: BridgeState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn connected() -> Arc<Bridge> {
        let bridge = Bridge::new(Some(Duration::from_secs(5))).unwrap();
        bridge.connect(async { Ok(()) }).unwrap();
        Arc::new(bridge)
    }

    fn wait_for(bridge: &Bridge, state: BridgeState) {
        for _ in 0..500 {
            if bridge.state() == state {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("bridge never reached {:?}", state);
    }

    #[test]
    fn test_connect_moves_to_connected() {
        let bridge = Bridge::new(None).unwrap();
        assert_eq!(bridge.state(), BridgeState::Created);
        let value = bridge.connect(async { Ok(42) }).unwrap();
        assert_eq!(value, 42);
        assert_eq!(bridge.state(), BridgeState::Connected);

        let err = bridge.connect(async { Ok(1) }).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn test_failed_handshake_stays_created() {
        let bridge = Bridge::new(None).unwrap();
        let err = bridge
            .connect(async { Err::<(), _>(anyhow::anyhow!("AUTH_KEY_UNREGISTERED")) })
            .unwrap_err();
        assert!(matches!(err, Error::Network { .. }));
        assert_eq!(bridge.state(), BridgeState::Created);
    }

    #[test]
    fn test_run_blocking_before_polling_runs_inline() {
        let bridge = connected();
        let out = bridge
            .run_blocking(async {
                tokio::task::yield_now().await;
                Ok("done")
            })
            .unwrap();
        assert_eq!(out, "done");
    }

    #[test]
    fn test_run_blocking_propagates_failure() {
        let bridge = connected();
        let err = bridge
            .run_blocking(async { Err::<(), _>(Error::ChatNotFound(3)) })
            .unwrap_err();
        assert!(matches!(err, Error::ChatNotFound(3)));
    }

    #[test]
    fn test_run_blocking_marshals_onto_polling_loop() {
        let bridge = connected();
        let poller = {
            let bridge = bridge.clone();
            thread::spawn(move || {
                bridge.run_forever(|shutdown| async move {
                    shutdown.cancelled().await;
                    Ok(())
                })
            })
        };
        wait_for(&bridge, BridgeState::Polling);

        let loop_thread = bridge
            .run_blocking(async { Ok(thread::current().id()) })
            .unwrap();
        assert_eq!(loop_thread, poller.thread().id());

        assert_eq!(bridge.request_stop(), BridgeState::Polling);
        poller.join().unwrap().unwrap();
        assert_eq!(bridge.state(), BridgeState::Stopped);
    }

    #[test]
    fn test_reentrant_call_is_rejected() {
        let bridge = connected();
        let inner = bridge.clone();
        let err = bridge
            .run_blocking(async move { inner.run_blocking(async { Ok(()) }) })
            .unwrap_err();
        assert!(matches!(err, Error::Reentrant));
    }

    #[test]
    fn test_scheduled_call_times_out() {
        let bridge = Bridge::new(Some(Duration::from_millis(50))).unwrap();
        bridge.connect(async { Ok(()) }).unwrap();
        let bridge = Arc::new(bridge);
        let poller = {
            let bridge = bridge.clone();
            thread::spawn(move || {
                bridge.run_forever(|shutdown| async move {
                    shutdown.cancelled().await;
                    Ok(())
                })
            })
        };
        wait_for(&bridge, BridgeState::Polling);

        let err = bridge
            .run_blocking(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        bridge.request_stop();
        poller.join().unwrap().unwrap();
    }

    #[test]
    fn test_in_flight_call_fails_when_polling_stops() {
        let bridge = Bridge::new(None).unwrap();
        bridge.connect(async { Ok(()) }).unwrap();
        let bridge = Arc::new(bridge);
        let poller = {
            let bridge = bridge.clone();
            thread::spawn(move || {
                bridge.run_forever(|shutdown| async move {
                    shutdown.cancelled().await;
                    Ok(())
                })
            })
        };
        wait_for(&bridge, BridgeState::Polling);

        let caller = {
            let bridge = bridge.clone();
            thread::spawn(move || {
                bridge.run_blocking(async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(7)
                })
            })
        };
        thread::sleep(Duration::from_millis(50));

        bridge.request_stop();
        poller.join().unwrap().unwrap();
        let result = caller.join().unwrap();
        assert!(matches!(result, Err(Error::Stopped)));
        assert_eq!(bridge.state(), BridgeState::Stopped);
    }

    #[test]
    fn test_blocking_call_from_other_runtime_is_not_reentrant() {
        let bridge = connected();
        let poller = {
            let bridge = bridge.clone();
            thread::spawn(move || {
                bridge.run_forever(|shutdown| async move {
                    shutdown.cancelled().await;
                    Ok(())
                })
            })
        };
        wait_for(&bridge, BridgeState::Polling);

        let host = tokio::runtime::Runtime::new().unwrap();
        let caller = bridge.clone();
        let out = host
            .block_on(async move {
                tokio::task::spawn_blocking(move || caller.run_blocking(async { Ok(1) })).await
            })
            .unwrap()
            .unwrap();
        assert_eq!(out, 1);

        bridge.request_stop();
        poller.join().unwrap().unwrap();
    }

    #[test]
    fn test_inline_call_from_other_runtime_is_not_reentrant() {
        let bridge = connected();
        let host = tokio::runtime::Runtime::new().unwrap();
        let caller = bridge.clone();
        let out = host
            .block_on(async move {
                tokio::task::spawn_blocking(move || caller.run_blocking(async { Ok("inline") }))
                    .await
            })
            .unwrap()
            .unwrap();
        assert_eq!(out, "inline");
    }

    #[test]
    fn test_stop_before_polling() {
        let bridge = connected();
        assert_eq!(bridge.request_stop(), BridgeState::Connected);
        assert_eq!(bridge.state(), BridgeState::Stopping);
        bridge.finish_stop(async { Ok(()) }).unwrap();
        assert_eq!(bridge.state(), BridgeState::Stopped);

        assert!(matches!(
            bridge.run_blocking(async { Ok(()) }),
            Err(Error::Stopped)
        ));
        let err = bridge.run_forever(|_| async { Ok(()) }).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }
}
