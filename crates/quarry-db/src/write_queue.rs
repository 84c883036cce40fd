// crates/quarry-db/src/write_queue.rs
// ============================================================================
// Module: Quarry Write Queue
// Description: Per-database FIFO of write jobs drained by one writer thread.
// Purpose: Serialize every mutation of a database onto a single connection.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! Each mutable database gets one [`WriteQueue`]. The first submission spawns
//! a dedicated writer thread which opens the write connection once and then
//! executes queued jobs strictly one at a time, in submission order.
//!
//! Jobs report through private reply channels:
//! - a blocking submit waits for the reply and returns the job's value or error;
//! - a non-blocking submit returns a [`WriteTicket`] carrying the job's
//!   correlation id, which can be waited on, polled, or dropped.
//!
//! A job error (or panic) becomes an `Err` on its reply channel and the writer
//! moves on to the next job. If the write connection cannot be opened, the
//! failure is kept and replayed to every job for the life of the queue; no
//! reconnect is attempted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::time::Instant;

use rusqlite::Connection;
use rusqlite::TransactionBehavior;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::connection::ConnectionMode;
use crate::connection::ConnectionOpener;
use crate::connection::close_quietly;
use crate::error::DatabaseError;

// ============================================================================
// SECTION: Options and Replies
// ============================================================================

/// How a write job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Wrap the job in an `IMMEDIATE` transaction (commit on `Ok`, roll back
    /// on `Err` or panic).
    pub transaction: bool,
    /// Run the job on a fresh connection opened and closed for it alone.
    pub isolated: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            transaction: true,
            isolated: false,
        }
    }
}

impl WriteOptions {
    /// Options for a job that manages its own transactions.
    #[must_use]
    pub const fn without_transaction() -> Self {
        Self {
            transaction: false,
            isolated: false,
        }
    }

    /// Options for a job on an isolated connection.
    #[must_use]
    pub const fn isolated() -> Self {
        Self {
            transaction: false,
            isolated: true,
        }
    }
}

/// Outcome of a submission.
#[derive(Debug)]
pub enum WriteReply<T> {
    /// Blocking submission: the job ran and produced this value.
    Completed(T),
    /// Non-blocking submission: the job is queued.
    Queued(WriteTicket<T>),
}

impl<T> WriteReply<T> {
    /// Returns the value, waiting for queued jobs.
    ///
    /// # Errors
    ///
    /// Returns the job's error for queued jobs that fail.
    pub fn into_value(self) -> Result<T, DatabaseError> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Queued(ticket) => ticket.wait(),
        }
    }

    /// Returns the correlation id of a queued job.
    #[must_use]
    pub const fn ticket_id(&self) -> Option<u64> {
        match self {
            Self::Completed(_) => None,
            Self::Queued(ticket) => Some(ticket.id),
        }
    }
}

/// Handle to a queued job.
///
/// Dropping the ticket stops waiting; the job still runs.
#[derive(Debug)]
pub struct WriteTicket<T> {
    /// Correlation id assigned at submission.
    id: u64,
    /// Reply channel for the job result.
    reply: mpsc::Receiver<Result<T, DatabaseError>>,
}

impl<T> WriteTicket<T> {
    /// Returns the correlation id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the job to finish.
    ///
    /// # Errors
    ///
    /// Returns the job's error, or [`DatabaseError::Closed`] when the writer
    /// went away without replying.
    pub fn wait(self) -> Result<T, DatabaseError> {
        self.reply.recv().map_err(|_| closed_reply())?
    }

    /// Returns the result if the job already finished.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<T, DatabaseError>> {
        match self.reply.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(closed_reply())),
        }
    }
}

/// Error returned when a reply channel closes without a result.
fn closed_reply() -> DatabaseError {
    DatabaseError::Closed("write queue reply channel closed".to_string())
}

// ============================================================================
// SECTION: Tasks
// ============================================================================

/// What the writer hands each task.
struct WriterContext<'a> {
    /// The write connection, or the error that prevented opening it.
    connection: Result<&'a mut Connection, &'a DatabaseError>,
    /// Opener used for isolated jobs.
    opener: &'a ConnectionOpener,
}

/// Queued unit of work; runs the job and posts its own reply.
struct WriteTask {
    /// Correlation id.
    id: u64,
    /// Type-erased job plus reply sender.
    run: Box<dyn FnOnce(WriterContext<'_>) + Send>,
}

/// Submission side of the writer thread.
struct WriterHandle {
    /// Channel into the writer thread.
    sender: mpsc::Sender<WriteTask>,
}

/// Queue state guarded by a mutex.
#[derive(Default)]
struct QueueState {
    /// Present once the writer has been started.
    writer: Option<WriterHandle>,
    /// Set by [`WriteQueue::close`].
    closed: bool,
}

// ============================================================================
// SECTION: Queue
// ============================================================================

/// Single-writer FIFO for one database.
///
/// # Invariants
/// - At most one job runs at any instant.
/// - Jobs run in the order their submissions were enqueued.
/// - A job failure never stops the writer thread.
pub struct WriteQueue {
    /// Opener for the write connection.
    opener: Arc<ConnectionOpener>,
    /// Lazily started writer.
    state: Mutex<QueueState>,
    /// Last assigned correlation id.
    sequence: AtomicU64,
}

impl WriteQueue {
    /// Creates a queue; the writer starts on first submission.
    #[must_use]
    pub fn new(opener: Arc<ConnectionOpener>) -> Self {
        Self {
            opener,
            state: Mutex::new(QueueState::default()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Returns the database name.
    #[must_use]
    pub fn database(&self) -> &str {
        self.opener.database()
    }

    /// Returns whether the writer thread has been started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).writer.is_some()
    }

    /// Submits a job.
    ///
    /// With `block` the call waits and returns [`WriteReply::Completed`];
    /// otherwise it returns [`WriteReply::Queued`] immediately.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Closed`] after [`WriteQueue::close`],
    /// [`DatabaseError::Io`] when the writer thread cannot be spawned, and,
    /// for blocking submissions, the job's own error.
    pub fn submit<T, F>(
        &self,
        job: F,
        options: WriteOptions,
        block: bool,
    ) -> Result<WriteReply<T>, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DatabaseError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();
        let database = self.database().to_string();
        let id = self.enqueue(move |id| WriteTask {
            id,
            run: Box::new(move |context: WriterContext<'_>| {
                let started = Instant::now();
                let result = match context.connection {
                    Err(err) => Err(err.clone()),
                    Ok(connection) => guard_panics(|| {
                        if options.isolated {
                            run_isolated(context.opener, job, options.transaction)
                        } else {
                            run_job(connection, job, options.transaction)
                        }
                    }),
                };
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                match &result {
                    Ok(_) => {
                        debug!(database = %database, task = id, elapsed_ms, "write job completed");
                    }
                    Err(err) => {
                        warn!(database = %database, task = id, error = %err, "write job failed");
                    }
                }
                let _ = reply_tx.send(result);
            }),
        })?;
        let ticket = WriteTicket {
            id,
            reply: reply_rx,
        };
        if block {
            ticket.wait().map(WriteReply::Completed)
        } else {
            Ok(WriteReply::Queued(ticket))
        }
    }

    /// Stops accepting jobs. Queued jobs still run; the writer thread exits
    /// and closes its connection once the queue drains.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        state.writer = None;
    }

    /// Assigns the next task id and pushes the task built for it, starting
    /// the writer on first use. Ids follow queue order.
    fn enqueue(&self, build: impl FnOnce(u64) -> WriteTask) -> Result<u64, DatabaseError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(DatabaseError::Closed(format!("{} write queue", self.database())));
        }
        if state.writer.is_none() {
            state.writer = Some(self.spawn_writer()?);
        }
        let Some(writer) = state.writer.as_ref() else {
            return Err(DatabaseError::Closed(format!("{} write queue", self.database())));
        };
        let id = self.sequence.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        writer.sender.send(build(id)).map_err(|_| {
            DatabaseError::Closed(format!("{} writer thread stopped", self.database()))
        })?;
        Ok(id)
    }

    /// Spawns the writer thread.
    fn spawn_writer(&self) -> Result<WriterHandle, DatabaseError> {
        let (sender, receiver) = mpsc::channel::<WriteTask>();
        let opener = Arc::clone(&self.opener);
        thread::Builder::new()
            .name(format!("quarry-writer-{}", self.database()))
            .spawn(move || writer_loop(&opener, &receiver))
            .map_err(|err| DatabaseError::Io(format!("failed to spawn writer thread: {err}")))?;
        Ok(WriterHandle {
            sender,
        })
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// SECTION: Writer Thread
// ============================================================================

/// Opens the write connection once, then drains tasks until every sender is gone.
fn writer_loop(opener: &ConnectionOpener, receiver: &mpsc::Receiver<WriteTask>) {
    let mut connection = opener.open(ConnectionMode::Write);
    match &connection {
        Ok(_) => debug!(database = opener.database(), "write connection opened"),
        Err(err) => error!(
            database = opener.database(),
            error = %err,
            "write connection failed to open; replaying error to queued jobs"
        ),
    }
    while let Ok(task) = receiver.recv() {
        let context = WriterContext {
            connection: connection.as_mut().map_err(|err| &*err),
            opener,
        };
        let id = task.id;
        (task.run)(context);
        debug!(database = opener.database(), task = id, "write task finished");
    }
    if let Ok(connection) = connection {
        close_quietly(opener.database(), connection);
    }
}

/// Runs a job on the shared write connection.
fn run_job<T, F>(connection: &mut Connection, job: F, transaction: bool) -> Result<T, DatabaseError>
where
    F: FnOnce(&Connection) -> Result<T, DatabaseError>,
{
    if transaction {
        let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = job(&tx)?;
        tx.commit()?;
        return Ok(value);
    }
    let result = job(connection);
    if result.is_err() && !connection.is_autocommit() {
        let _ = connection.execute_batch("ROLLBACK");
    }
    result
}

/// Runs a job on a connection opened just for it.
fn run_isolated<T, F>(
    opener: &ConnectionOpener,
    job: F,
    transaction: bool,
) -> Result<T, DatabaseError>
where
    F: FnOnce(&Connection) -> Result<T, DatabaseError>,
{
    let mut connection = opener.open(ConnectionMode::Write)?;
    let result = run_job(&mut connection, job, transaction);
    close_quietly(opener.database(), connection);
    result
}

/// Converts a panic inside `job` into [`DatabaseError::WriteJob`].
fn guard_panics<T>(job: impl FnOnce() -> Result<T, DatabaseError>) -> Result<T, DatabaseError> {
    panic::catch_unwind(AssertUnwindSafe(job))
        .unwrap_or_else(|payload| Err(DatabaseError::WriteJob(panic_message(payload.as_ref()))))
}

/// Extracts a readable message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return format!("write job panicked: {message}");
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return format!("write job panicked: {message}");
    }
    "write job panicked".to_string()
}
