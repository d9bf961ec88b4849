//! # AsynchAgent - Named Dedicated-Thread Worker
//!
//! One agent, one OS thread. The agent's work closure runs on its own
//! thread and is expected to poll the cancellation token between blocking
//! operations. When the closure panics, the configured fault policy decides
//! what happens: crash the process, restart the work on a fresh thread, or
//! log and stop.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{AgentError, Result};

/// What to do when an agent's work loop panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultBehavior {
    /// A fault in this agent is fatal to the process
    CrashOnFault,
    /// Restart the work on a fresh thread
    RestartOnFault,
    /// Log the fault and leave the agent stopped
    IgnoreFault,
}

/// Agent lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Unstarted,
    Running,
    StopRequested,
    Stopped,
}

impl AgentState {
    fn name(&self) -> &'static str {
        match self {
            AgentState::Unstarted => "Unstarted",
            AgentState::Running => "Running",
            AgentState::StopRequested => "StopRequested",
            AgentState::Stopped => "Stopped",
        }
    }
}

/// Cooperative cancellation signal, recreated on every start.
#[derive(Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

static AGENT_SEQUENCE: AtomicUsize = AtomicUsize::new(0);

type WorkFn = dyn Fn(&CancellationToken) + Send + Sync;

/// Named background worker owning one dedicated thread. Restartable: a
/// stopped agent may be started again, on a fresh thread.
pub struct AsynchAgent {
    name: String,
    fault_behavior: FaultBehavior,
    work: Arc<WorkFn>,
    state: Mutex<AgentState>,
    token: Mutex<CancellationToken>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: Mutex<Option<ThreadId>>,
}

impl AsynchAgent {
    /// Build an agent. The name gets a process-wide sequence suffix so log
    /// lines from same-typed agents stay distinguishable.
    pub fn new(
        name: impl Into<String>,
        fault_behavior: FaultBehavior,
        work: impl Fn(&CancellationToken) + Send + Sync + 'static,
    ) -> Arc<Self> {
        let seq = AGENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            name: format!("{}/{}", name.into(), seq),
            fault_behavior,
            work: Arc::new(work),
            state: Mutex::new(AgentState::Unstarted),
            token: Mutex::new(CancellationToken::new()),
            handle: Mutex::new(None),
            thread_id: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    /// The id of the thread currently (or last) running the work loop.
    pub fn thread_id(&self) -> Option<ThreadId> {
        *self.thread_id.lock()
    }

    /// Start the work loop on a fresh thread. Legal from `Unstarted` and
    /// `Stopped`.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                AgentState::Unstarted | AgentState::Stopped => {}
                other => {
                    return Err(AgentError::InvalidStart {
                        name: self.name.clone(),
                        state: other.name(),
                    })
                }
            }
            *state = AgentState::Running;
        }
        let token = CancellationToken::new();
        *self.token.lock() = token.clone();
        self.spawn(token)?;
        info!(agent = %self.name, "agent started");
        Ok(())
    }

    fn spawn(self: &Arc<Self>, token: CancellationToken) -> Result<()> {
        let agent = self.clone();
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || agent.thread_main(token))
            .map_err(|source| AgentError::Spawn {
                name: self.name.clone(),
                source,
            })?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    fn thread_main(self: Arc<Self>, token: CancellationToken) {
        *self.thread_id.lock() = Some(thread::current().id());
        let result = catch_unwind(AssertUnwindSafe(|| (self.work)(&token)));
        match result {
            Ok(()) => {
                *self.state.lock() = AgentState::Stopped;
                debug!(agent = %self.name, "agent work loop finished");
            }
            Err(_) => match self.fault_behavior {
                FaultBehavior::CrashOnFault => {
                    error!(agent = %self.name, "agent faulted; crashing process");
                    std::process::exit(1);
                }
                FaultBehavior::IgnoreFault => {
                    warn!(agent = %self.name, "agent faulted; ignoring");
                    *self.state.lock() = AgentState::Stopped;
                }
                FaultBehavior::RestartOnFault => {
                    if token.is_cancelled() {
                        *self.state.lock() = AgentState::Stopped;
                        return;
                    }
                    warn!(agent = %self.name, "agent faulted; restarting on a fresh thread");
                    // The faulted incarnation ends before the next begins:
                    // mark Stopped, then start() issues a fresh thread and a
                    // fresh cancellation token.
                    *self.state.lock() = AgentState::Stopped;
                    if let Err(e) = self.start() {
                        error!(agent = %self.name, error = %e, "agent restart failed");
                        *self.state.lock() = AgentState::Stopped;
                    }
                }
            },
        }
    }

    /// Cooperatively stop: cancel the token and wait for the work loop to
    /// observe it. Idempotent; never panics.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                AgentState::Running => *state = AgentState::StopRequested,
                AgentState::StopRequested => {}
                _ => return,
            }
        }
        self.token.lock().cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        *self.state.lock() = AgentState::Stopped;
        info!(agent = %self.name, "agent stopped");
    }
}

impl Drop for AsynchAgent {
    fn drop(&mut self) {
        self.token.lock().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..deadline_ms {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        check()
    }

    #[test]
    fn test_start_runs_work_on_own_thread() {
        let ran_on = Arc::new(Mutex::new(None));
        let agent = {
            let ran_on = ran_on.clone();
            AsynchAgent::new("TestAgent", FaultBehavior::IgnoreFault, move |_| {
                *ran_on.lock() = Some(thread::current().id());
            })
        };
        agent.start().unwrap();
        assert!(wait_until(1000, || agent.state() == AgentState::Stopped));
        let worker = ran_on.lock().unwrap();
        assert_ne!(worker, thread::current().id());
    }

    #[test]
    fn test_double_start_is_rejected() {
        let agent = AsynchAgent::new("Blocker", FaultBehavior::IgnoreFault, |token| {
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
        });
        agent.start().unwrap();
        assert!(agent.start().is_err());
        agent.stop();
        assert_eq!(agent.state(), AgentState::Stopped);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let agent = AsynchAgent::new("Stopper", FaultBehavior::IgnoreFault, |token| {
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
        });
        agent.start().unwrap();
        agent.stop();
        agent.stop();
        assert_eq!(agent.state(), AgentState::Stopped);
    }

    #[test]
    fn test_restart_after_stop_gets_new_thread() {
        let agent = AsynchAgent::new("Restarter", FaultBehavior::IgnoreFault, |token| {
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
        });
        agent.start().unwrap();
        assert!(wait_until(1000, || agent.thread_id().is_some()));
        let first = agent.thread_id().unwrap();
        agent.stop();

        agent.start().unwrap();
        assert!(wait_until(1000, || agent.thread_id() != Some(first)));
        assert_ne!(agent.thread_id().unwrap(), first);
        agent.stop();
    }

    #[test]
    fn test_restart_on_fault_resumes_on_fresh_thread() {
        let attempts = Arc::new(AtomicU32::new(0));
        let threads_seen = Arc::new(Mutex::new(Vec::new()));
        let agent = {
            let attempts = attempts.clone();
            let threads_seen = threads_seen.clone();
            AsynchAgent::new("Faulty", FaultBehavior::RestartOnFault, move |token| {
                threads_seen.lock().push(thread::current().id());
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("injected fault");
                }
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };
        agent.start().unwrap();
        assert!(wait_until(1000, || attempts.load(Ordering::SeqCst) >= 2));
        assert_eq!(agent.state(), AgentState::Running);
        agent.stop();

        let seen = threads_seen.lock();
        assert!(seen.len() >= 2);
        assert_ne!(seen[0], seen[1], "restart must use a fresh thread");
    }

    #[test]
    fn test_restart_on_fault_issues_fresh_token() {
        let attempts = Arc::new(AtomicU32::new(0));
        let tokens_seen = Arc::new(Mutex::new(Vec::new()));
        let agent = {
            let attempts = attempts.clone();
            let tokens_seen = tokens_seen.clone();
            AsynchAgent::new("FaultyToken", FaultBehavior::RestartOnFault, move |token| {
                tokens_seen.lock().push(token.clone());
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("injected fault");
                }
                assert!(!token.is_cancelled());
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };
        agent.start().unwrap();
        assert!(wait_until(1000, || attempts.load(Ordering::SeqCst) >= 2));
        agent.stop();

        let seen = tokens_seen.lock();
        assert!(seen.len() >= 2);
        assert!(
            !Arc::ptr_eq(&seen[0].0, &seen[1].0),
            "restart must use a fresh token"
        );
    }

    #[test]
    fn test_ignore_fault_leaves_agent_stopped() {
        let agent = AsynchAgent::new("Ignorer", FaultBehavior::IgnoreFault, |_| {
            panic!("injected fault");
        });
        agent.start().unwrap();
        assert!(wait_until(1000, || agent.state() == AgentState::Stopped));
    }
}
