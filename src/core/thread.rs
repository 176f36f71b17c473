//! Cooperative, single-threaded scheduling per logical thread: each
//! [`Thread`] drains its own mailbox one message at a time, and the only
//! way another thread reaches its state is by posting a closure through
//! [`ThreadHandle::post`]/[`ThreadHandle::call`].

use std::{
    fmt::{self, Debug, Formatter},
    sync::atomic::{AtomicU32, Ordering},
};
use tokio::sync::{mpsc, oneshot};

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(0);

/// A unit of work posted to a thread's mailbox. `Run` carries an arbitrary
/// boxed closure so that callers don't need a dedicated message variant for
/// every operation; callers that need a reply close over a oneshot
/// sender in the closure instead.
pub enum ThreadMsg {
    Run(Box<dyn FnOnce() + Send + 'static>),
}

impl Debug for ThreadMsg {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadMsg::Run(..)")
    }
}

/// Cloneable handle used by other threads to post work onto this thread's
/// mailbox. Consider it analogous to a container you can submit work to and
/// which drives it to completion on its own schedule, not an OS thread
/// handle.
#[derive(Clone)]
pub struct ThreadHandle {
    id: u32,
    name: String,
    tx: mpsc::UnboundedSender<ThreadMsg>,
}

impl Debug for ThreadHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "thread[{}:{}]", self.id, self.name)
    }
}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for ThreadHandle {}

impl ThreadHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Posts a closure to run on this thread. Fire-and-forget: the thread
    /// may have already shut down, in which case the message is dropped.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.tx.send(ThreadMsg::Run(Box::new(f)));
    }

    /// Posts a closure and awaits its result via a oneshot reply, the
    /// pattern used whenever a cross-thread op needs to observe completion
    /// (e.g. closing a descriptor on its home thread).
    pub async fn call<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(move || {
            let _ = reply_tx.send(f());
        });
        reply_rx.await.ok()
    }
}

/// An owned, running thread: a tokio task draining its own mailbox one
/// message at a time, cooperative by construction (no message is started
/// until the previous one's synchronous body returns).
pub struct Thread {
    handle: ThreadHandle,
    join: tokio::task::JoinHandle<()>,
}

impl Thread {
    /// Spawns a new thread named `name`.
    pub fn spawn(name: impl Into<String>) -> Thread {
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::SeqCst);
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<ThreadMsg>();
        let join = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    ThreadMsg::Run(f) => f(),
                }
            }
        });
        Thread {
            handle: ThreadHandle { id, name, tx },
            join,
        }
    }

    pub fn handle(&self) -> ThreadHandle {
        self.handle.clone()
    }

    /// Stops accepting new messages; already-queued messages still drain.
    pub async fn shutdown(self) {
        drop(self.handle.tx);
        let _ = self.join.await;
    }
}
