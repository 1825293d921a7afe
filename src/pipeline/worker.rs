// SPDX-License-Identifier: GPL-3.0-only
//! Single-threaded task loops
//!
//! A [`TaskLoop`] owns a piece of thread-affine state (a GPU context and
//! everything created from it) on a dedicated thread. Other threads never
//! touch the state directly; they post closures through a [`TaskSender`]
//! and the loop runs them one at a time in order.

use crate::errors::ChannelError;
use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info, warn};

/// Work item run against the loop's state
pub type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

enum Message<S> {
    Run(Task<S>),
    Quit,
}

/// Cloneable handle for posting work to a [`TaskLoop`]
pub struct TaskSender<S> {
    name: Arc<str>,
    normal: Sender<Message<S>>,
    urgent: Sender<Message<S>>,
    running: Arc<AtomicBool>,
    thread_id: ThreadId,
}

impl<S> Clone for TaskSender<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            normal: self.normal.clone(),
            urgent: self.urgent.clone(),
            running: Arc::clone(&self.running),
            thread_id: self.thread_id,
        }
    }
}

impl<S: 'static> TaskSender<S> {
    /// Queue a task behind everything already posted.
    ///
    /// Returns false when the loop has exited.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.normal.send(Message::Run(Box::new(task))).is_ok()
    }

    /// Queue a task ahead of normal tasks
    pub fn post_at_front<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.urgent.send(Message::Run(Box::new(task))).is_ok()
    }

    /// Run `task` on the loop and block until it returns.
    ///
    /// Calling this from the loop's own thread would deadlock, so it is
    /// rejected with [`ChannelError::Disconnected`].
    pub fn post_and_wait<R, F>(&self, task: F) -> Result<R, ChannelError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        if self.is_loop_thread() {
            warn!(name = %self.name, "post_and_wait called from the loop thread");
            return Err(ChannelError::Disconnected);
        }
        let (reply_tx, reply_rx) = bounded(1);
        let posted = self.post(move |state| {
            let _ = reply_tx.send(task(state));
        });
        if !posted {
            return Err(ChannelError::Disconnected);
        }
        reply_rx.recv().map_err(|_| ChannelError::Disconnected)
    }

    /// Whether the loop thread is alive
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the caller is running on the loop thread
    pub fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Owner of a task loop thread
///
/// Dropping the loop quits it and joins the thread.
pub struct TaskLoop<S> {
    sender: TaskSender<S>,
    thread_handle: Option<JoinHandle<()>>,
}

impl<S: 'static> TaskLoop<S> {
    /// Start a loop whose state is built on the new thread
    ///
    /// `init_fn` runs first; if it fails the thread exits and the error is
    /// returned here. `exit_fn` receives the state after a quit request
    /// once every task posted before it has run.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let worker = TaskLoop::start_with_init(
    ///     "render",
    ///     || Ok(RenderState::new()),
    ///     |state| state.release(),
    /// )?;
    /// worker.sender().post(|state| state.draw());
    /// ```
    pub fn start_with_init<I, E>(name: &str, init_fn: I, exit_fn: E) -> Result<Self, String>
    where
        I: FnOnce() -> Result<S, String> + Send + 'static,
        E: FnOnce(S) + Send + 'static,
    {
        let (normal_tx, normal_rx) = unbounded::<Message<S>>();
        let (urgent_tx, urgent_rx) = unbounded::<Message<S>>();
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        let name_clone = name.to_string();

        info!(name = %name, "Starting task loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %name_clone, "Task loop thread started, initializing...");

                let state = match init_fn() {
                    Ok(state) => {
                        let _ = ready_tx.send(Ok(()));
                        state
                    }
                    Err(e) => {
                        warn!(name = %name_clone, error = %e, "Initialization failed");
                        running_clone.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let state = run_loop(&name_clone, state, &normal_rx, &urgent_rx);
                exit_fn(state);

                running_clone.store(false, Ordering::SeqCst);
                info!(name = %name_clone, "Task loop thread exiting");
            })
            .map_err(|e| format!("failed to spawn {}: {}", name, e))?;

        let thread_id = thread_handle.thread().id();
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread_handle.join();
                return Err(format!("{} exited during initialization", name));
            }
        }

        Ok(Self {
            sender: TaskSender {
                name: Arc::from(name),
                normal: normal_tx,
                urgent: urgent_tx,
                running,
                thread_id,
            },
            thread_handle: Some(thread_handle),
        })
    }

    /// Handle for posting tasks
    pub fn sender(&self) -> TaskSender<S> {
        self.sender.clone()
    }

    pub fn is_running(&self) -> bool {
        self.sender.is_running()
    }

    /// Ask the loop to exit after the tasks already queued (non-blocking)
    pub fn request_quit(&self) {
        debug!(name = %self.sender.name, "Requesting task loop quit");
        let _ = self.sender.normal.send(Message::Quit);
    }

    /// Quit and wait for the thread to finish
    ///
    /// From the loop's own thread this only requests the quit.
    pub fn quit(&mut self) {
        self.request_quit();
        if self.sender.is_loop_thread() {
            self.thread_handle.take();
            return;
        }
        self.join();
    }

    /// Wait for the thread to finish without sending a quit request
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.sender.name, "Waiting for task loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.sender.name, "Task loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.sender.name, "Task loop thread finished");
            }
        }
    }
}

fn run_loop<S>(name: &str, mut state: S, normal: &Receiver<Message<S>>, urgent: &Receiver<Message<S>>) -> S {
    loop {
        let message = match urgent.try_recv() {
            Ok(message) => message,
            Err(_) => select! {
                recv(urgent) -> message => message,
                recv(normal) -> message => message,
            }
            .unwrap_or(Message::Quit),
        };

        match message {
            Message::Run(task) => {
                if catch_unwind(AssertUnwindSafe(|| task(&mut state))).is_err() {
                    error!(name = %name, "Task panicked, continuing");
                }
            }
            Message::Quit => {
                debug!(name = %name, "Quit received");
                return state;
            }
        }
    }
}

impl<S> Drop for TaskLoop<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.sender.name, "TaskLoop dropped, stopping loop");
            let _ = self.sender.normal.send(Message::Quit);
            if thread::current().id() != self.sender.thread_id {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn test_tasks_run_in_order() {
        let mut worker = TaskLoop::start_with_init("test-order", || Ok(Vec::new()), |_| {}).unwrap();
        let sender = worker.sender();
        for i in 0..10 {
            sender.post(move |log: &mut Vec<u32>| log.push(i));
        }
        let log = sender.post_and_wait(|log| log.clone()).unwrap();
        assert_eq!(log, (0..10).collect::<Vec<_>>());
        worker.quit();
        assert!(!worker.is_running());
    }

    #[test]
    fn test_with_init() {
        let mut worker = TaskLoop::start_with_init("test-init", || Ok(42u32), |_| {}).unwrap();
        assert_eq!(worker.sender().post_and_wait(|state| *state).unwrap(), 42);
        worker.quit();
    }

    #[test]
    fn test_init_failure() {
        let result = TaskLoop::<()>::start_with_init(
            "test-fail-init",
            || Err("Init failed".to_string()),
            |_| {},
        );
        assert_eq!(result.err(), Some("Init failed".to_string()));
    }

    #[test]
    fn test_exit_runs_after_pending_tasks() {
        let counter = Arc::new(AtomicU32::new(0));
        let at_exit = Arc::new(AtomicU32::new(0));
        let at_exit_clone = Arc::clone(&at_exit);
        let counter_clone = Arc::clone(&counter);

        let mut worker = TaskLoop::start_with_init(
            "test-exit",
            move || Ok(counter_clone),
            move |state: Arc<AtomicU32>| at_exit_clone.store(state.load(Ordering::SeqCst), Ordering::SeqCst),
        )
        .unwrap();
        let sender = worker.sender();
        for _ in 0..5 {
            sender.post(|state: &mut Arc<AtomicU32>| {
                thread::sleep(Duration::from_millis(2));
                state.fetch_add(1, Ordering::SeqCst);
            });
        }
        worker.quit();
        assert_eq!(at_exit.load(Ordering::SeqCst), 5);
        assert!(!sender.post(|_| {}), "posting after exit must fail");
    }

    #[test]
    fn test_front_of_queue() {
        let mut worker = TaskLoop::start_with_init("test-front", || Ok(Vec::new()), |_| {}).unwrap();
        let sender = worker.sender();
        let (gate_tx, gate_rx) = bounded::<()>(0);

        // hold the loop so the next two tasks queue up
        sender.post(move |_: &mut Vec<&'static str>| {
            let _ = gate_rx.recv();
        });
        sender.post(|log| log.push("normal"));
        sender.post_at_front(|log| log.push("urgent"));
        gate_tx.send(()).unwrap();

        let log = sender.post_and_wait(|log| log.clone()).unwrap();
        assert_eq!(log, vec!["urgent", "normal"]);
        worker.quit();
    }

    #[test]
    fn test_panicking_task_does_not_kill_loop() {
        let mut worker = TaskLoop::start_with_init("test-panic", || Ok(0u32), |_| {}).unwrap();
        let sender = worker.sender();
        sender.post(|_| panic!("boom"));
        assert_eq!(sender.post_and_wait(|state| *state + 1).unwrap(), 1);
        worker.quit();
    }

    #[test]
    fn test_wait_from_loop_thread_is_rejected() {
        let worker = TaskLoop::start_with_init("test-reentrant", || Ok(()), |_| {}).unwrap();
        let sender = worker.sender();
        let inner = sender.clone();
        let result = Arc::new(Mutex::new(None));
        let result_clone = Arc::clone(&result);
        sender
            .post_and_wait(move |_| {
                *result_clone.lock().unwrap() = Some(inner.post_and_wait(|_| ()).is_err());
            })
            .unwrap();
        assert_eq!(*result.lock().unwrap(), Some(true));
        drop(worker);
    }
}
