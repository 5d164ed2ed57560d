//! Utterly inefficient cross-platform cooperative user-mode scheduling
//!
//! A [`ThreadGroup`] owns a set of host threads and lets only one of them run
//! at a time: the one chosen by the client-supplied [`Scheduler`]. The others
//! stay parked. A running thread gives up the processor by changing the
//! scheduler's decision and calling [`yield_now`].
use once_cell::unsync::OnceCell;
use slab::Slab;
use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, Result},
};


/// Represents a dynamic set of threads that can be scheduled for execution by
/// `Sched: `[`Scheduler`].
pub struct ThreadGroup<Sched: ?Sized> {
    state: Arc<Mutex<State<Sched>>>,
}

impl<Sched: ?Sized> Clone for ThreadGroup<Sched> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<Sched: ?Sized> fmt::Debug for ThreadGroup<Sched> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("state", &Arc::as_ptr(&self.state))
            .finish()
    }
}

/// Object that can be used to join on a [`ThreadGroup`].
#[derive(Debug)]
pub struct ThreadGroupJoinHandle {
    result_recv: mpsc::Receiver<Result<()>>,
}

/// RAII guard returned by [`ThreadGroup::lock`].
pub struct ThreadGroupLockGuard<'a, Sched: ?Sized> {
    state_ref: &'a Arc<Mutex<State<Sched>>>,
    guard: MutexGuard<'a, State<Sched>>,
}

/// Identifies a thread in [`ThreadGroup`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ThreadId(usize);

/// Encapsulates the state of a client-supplied user-mode scheduler.
pub trait Scheduler: Send + 'static {
    /// Choose the next thread to run.
    ///
    /// It's an error to return an already-exited thread. The client is
    /// responsible for tracking the lifetime of spawned threads.
    fn choose_next_thread(&mut self) -> Option<ThreadId>;

    /// Called when a thread exits.
    fn thread_exited(&mut self, thread_id: ThreadId) {
        let _ = thread_id;
    }
}

struct State<Sched: ?Sized> {
    threads: Slab<WorkerThread>,
    cur_thread_id: Option<ThreadId>,
    shutting_down: bool,
    result_send: mpsc::Sender<Result<()>>,
    sched: Sched,
}

struct WorkerThread {
    thread: Option<thread::Thread>,
}

type SharedState = Arc<Mutex<State<dyn Scheduler>>>;

thread_local! {
    /// The thread group the current worker thread belongs to, and the
    /// thread's ID in it.
    static CURRENT: OnceCell<(SharedState, ThreadId)> = OnceCell::new();
}

/// A panicking worker thread leaves the mutex poisoned. The state is still
/// consistent because no code panics while holding the lock.
fn lock_state<T: ?Sized>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<Sched: Scheduler> ThreadGroup<Sched> {
    /// Construct a new `ThreadGroup` and the corresponding
    /// [`ThreadGroupJoinHandle`].
    pub fn new(sched: Sched) -> (Self, ThreadGroupJoinHandle) {
        let (send, recv) = mpsc::channel();

        let state = Arc::new(Mutex::new(State {
            threads: Slab::new(),
            cur_thread_id: None,
            shutting_down: false,
            result_send: send,
            sched,
        }));

        (Self { state }, ThreadGroupJoinHandle { result_recv: recv })
    }
}

impl ThreadGroupJoinHandle {
    /// Wait for the thread group to shut down. Returns the panic payload if a
    /// worker thread panicked.
    pub fn join(self) -> Result<()> {
        // The sender lives as long as the thread group
        self.result_recv.recv().unwrap_or(Ok(()))
    }
}

impl<Sched: Scheduler + ?Sized> ThreadGroup<Sched> {
    /// Acquire a lock on the thread group's state.
    pub fn lock(&self) -> ThreadGroupLockGuard<'_, Sched> {
        ThreadGroupLockGuard {
            state_ref: &self.state,
            guard: lock_state(&self.state),
        }
    }
}

impl<'a, Sched: Scheduler> ThreadGroupLockGuard<'a, Sched> {
    /// Start a worker thread.
    ///
    /// This does not automatically schedule the spawned thread. You should
    /// store the obtained `ThreadId` in the contained `Sched: `[`Scheduler`]
    /// and have it chosen by [`Scheduler::choose_next_thread`] for the thread
    /// to actually run.
    pub fn spawn(&mut self, f: impl FnOnce(ThreadId) + Send + 'static) -> ThreadId {
        let state: SharedState = Arc::clone(self.state_ref) as _;

        let key = self.guard.threads.insert(WorkerThread { thread: None });
        let thread_id = ThreadId(key);

        let join_handle = thread::Builder::new()
            .name(format!("ums worker {key}"))
            .spawn(move || worker_main(state, thread_id, f))
            .unwrap_or_else(|e| panic!("failed to spawn a worker thread: {e}"));

        // The worker can't look at this before we release the lock
        self.guard.threads[key].thread = Some(join_handle.thread().clone());

        log::trace!("created {thread_id:?}");

        thread_id
    }
}

impl<'a, Sched: Scheduler + ?Sized> ThreadGroupLockGuard<'a, Sched> {
    /// Let the scheduler decide the next thread to run, and wake it up.
    ///
    /// The thread currently holding the processor is not stopped; it keeps
    /// running until it calls [`yield_now`]. Calling this from outside of the
    /// thread group is the way to start the scheduling, or to wake up a
    /// thread that's waiting for an external event.
    pub fn preempt(&mut self) {
        log::trace!("preempting {:?}", self.guard.cur_thread_id);
        self.guard.unpark_next_thread();
    }

    /// Shut down the thread group.
    ///
    /// [`ThreadGroupJoinHandle::join`] unblocks immediately, returning
    /// `Ok(())`. The system will not call [`Scheduler::choose_next_thread`]
    /// anymore, so the threads that haven't exited stay parked forever.
    pub fn shutdown(&mut self) {
        if self.guard.shutting_down {
            return;
        }
        log::trace!(
            "shutdown requested, abandoning {} thread(s)",
            self.guard.threads.len()
        );
        self.guard.shutting_down = true;
        self.guard.cur_thread_id = None;

        // Ignore if the receiver has already hung up
        let _ = self.guard.result_send.send(Ok(()));
    }

    /// Get a mutable reference to the contained `Sched: `[`Scheduler`].
    pub fn scheduler(&mut self) -> &mut Sched {
        &mut self.guard.sched
    }
}

impl<Sched: Scheduler + ?Sized> State<Sched> {
    /// Find the next thread to run and unpark that thread.
    fn unpark_next_thread(&mut self) {
        if self.shutting_down {
            return;
        }

        self.cur_thread_id = self.sched.choose_next_thread();
        log::trace!("scheduling {:?}", self.cur_thread_id);

        if let Some(thread_id) = self.cur_thread_id {
            let thread = self
                .threads
                .get(thread_id.0)
                .and_then(|worker| worker.thread.as_ref());
            match thread {
                Some(thread) => thread.unpark(),
                None => panic!("the scheduler chose a nonexistent thread {thread_id:?}"),
            }
        }
    }
}

fn worker_main(state: SharedState, thread_id: ThreadId, f: impl FnOnce(ThreadId)) {
    CURRENT.with(|cell| {
        let _ = cell.set((Arc::clone(&state), thread_id));
    });

    // Block the spawned thread until scheduled to run
    park_until_scheduled(&state, thread_id);

    // Call the thread entry point
    let result = catch_unwind(AssertUnwindSafe(move || f(thread_id)));

    log::trace!("{thread_id:?} exited with result {result:?}");

    // Delete the current thread
    let mut state_guard = lock_state(&state);
    state_guard.sched.thread_exited(thread_id);
    state_guard.threads.remove(thread_id.0);

    if let Err(e) = result {
        // Send the panic payload to the thread group's owner. Leave other
        // threads hanging because there's no way to terminate them safely.
        let _ = state_guard.result_send.send(Err(e));
        return;
    }

    // Invoke the scheduler
    state_guard.unpark_next_thread();
}

/// Park the current thread until the scheduler chooses it. `park` can wake up
/// spuriously, so the decision is checked every time.
fn park_until_scheduled(state: &Mutex<State<dyn Scheduler>>, thread_id: ThreadId) {
    while lock_state(state).cur_thread_id != Some(thread_id) {
        thread::park();
    }
}

/// Get the ID of the current worker thread. Returns `None` if the current
/// thread doesn't belong to a thread group.
pub fn current_thread() -> Option<ThreadId> {
    CURRENT.with(|cell| cell.get().map(|&(_, thread_id)| thread_id))
}

/// Voluntarily yield the processor to let the scheduler decide the next thread
/// to run. Returns when the current thread is chosen again.
///
/// Panics if the current thread is not a worker thread of some
/// [`ThreadGroup`].
pub fn yield_now() {
    let (state, thread_id) = match CURRENT.with(|cell| cell.get().cloned()) {
        Some(x) => x,
        None => panic!("current thread does not belong to a thread group"),
    };

    {
        let mut state_guard = lock_state(&state);
        log::trace!("{thread_id:?} yielded the processor");
        state_guard.unpark_next_thread();
    }

    // This might end immediately if the current thread is the next thread to
    // run
    park_until_scheduled(&state, thread_id);
}

/// Stop the current thread forever without unwinding its stack.
pub fn park_forever() -> ! {
    loop {
        thread::park();
    }
}
