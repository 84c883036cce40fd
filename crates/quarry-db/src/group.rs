// crates/quarry-db/src/group.rs
// ============================================================================
// Module: Quarry Connection Group
// Description: Fixed-size set of lazily opened read connections.
// Purpose: Bound concurrent readers per database with scoped acquisition.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! A [`ConnectionGroup`] owns `size` slots for one database. [`acquire`]
//! claims the first free slot (opening its handle on first use) and blocks on
//! a condition variable while every slot is held. The returned
//! [`PooledConnection`] gives the slot back when dropped, on every exit path.
//!
//! Waiters are woken one per release; which waiter wins is up to the
//! scheduler, so acquisition is not FIFO.
//!
//! [`acquire`]: ConnectionGroup::acquire

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use rusqlite::Connection;
use tracing::debug;

use crate::connection::ConnectionMode;
use crate::connection::ConnectionOpener;
use crate::connection::close_quietly;
use crate::error::DatabaseError;

// ============================================================================
// SECTION: Slots
// ============================================================================

/// One connection slot.
#[derive(Default)]
struct Slot {
    /// Idle handle parked in the slot; `None` while held or never opened.
    connection: Option<Connection>,
    /// Whether a caller currently holds the slot.
    held: bool,
}

/// Mutable group state guarded by the group mutex.
struct GroupState {
    /// Fixed slot list.
    slots: Vec<Slot>,
    /// Set once the group is closed; released handles are then closed.
    closed: bool,
}

// ============================================================================
// SECTION: Group
// ============================================================================

/// Fixed-size read connection set for one database.
///
/// # Invariants
/// - The slot count never changes after construction.
/// - A held slot is owned by exactly one [`PooledConnection`].
pub struct ConnectionGroup {
    /// Opener for read handles.
    opener: Arc<ConnectionOpener>,
    /// Slot state.
    state: Mutex<GroupState>,
    /// Signalled whenever a slot is released or the group closes.
    released: Condvar,
}

impl ConnectionGroup {
    /// Creates a group of `size` unopened slots.
    #[must_use]
    pub fn new(opener: Arc<ConnectionOpener>, size: usize) -> Self {
        let slots = (0 .. size.max(1)).map(|_| Slot::default()).collect();
        Self {
            opener,
            state: Mutex::new(GroupState {
                slots,
                closed: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Returns the database name.
    #[must_use]
    pub fn database(&self) -> &str {
        self.opener.database()
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn size(&self) -> usize {
        self.lock_state().slots.len()
    }

    /// Returns the number of slots currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.lock_state().slots.iter().filter(|slot| slot.held).count()
    }

    /// Returns the number of slots with an idle open handle.
    #[must_use]
    pub fn open_idle(&self) -> usize {
        self.lock_state().slots.iter().filter(|slot| slot.connection.is_some()).count()
    }

    /// Claims a connection, blocking until one is free.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Connection`] when a lazily opened handle
    /// fails to open (the slot is released again) and
    /// [`DatabaseError::Closed`] once the group is closed.
    pub fn acquire(self: &Arc<Self>) -> Result<PooledConnection, DatabaseError> {
        self.acquire_inner(None)?.ok_or_else(|| {
            DatabaseError::Closed(format!("{} connection group", self.database()))
        })
    }

    /// Claims a connection, giving up after `timeout`.
    ///
    /// Returns `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionGroup::acquire`].
    pub fn acquire_timeout(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<Option<PooledConnection>, DatabaseError> {
        self.acquire_inner(Some(Instant::now() + timeout))
    }

    /// Closes idle handles; held handles close when released.
    pub fn close(&self) {
        let idle: Vec<Connection> = {
            let mut state = self.lock_state();
            state.closed = true;
            state.slots.iter_mut().filter_map(|slot| slot.connection.take()).collect()
        };
        self.released.notify_all();
        for connection in idle {
            close_quietly(self.database(), connection);
        }
    }

    /// Scans for a free slot, waiting until `deadline` (or forever).
    fn acquire_inner(
        self: &Arc<Self>,
        deadline: Option<Instant>,
    ) -> Result<Option<PooledConnection>, DatabaseError> {
        let mut state = self.lock_state();
        loop {
            if state.closed {
                return Err(DatabaseError::Closed(format!(
                    "{} connection group",
                    self.database()
                )));
            }
            if let Some(index) = state.slots.iter().position(|slot| !slot.held) {
                let idle = state.slots.get_mut(index).and_then(|slot| {
                    slot.held = true;
                    slot.connection.take()
                });
                drop(state);
                let connection = match idle {
                    Some(connection) => connection,
                    None => match self.opener.open(ConnectionMode::Read) {
                        Ok(connection) => {
                            debug!(
                                database = self.database(),
                                slot = index,
                                "opened read connection"
                            );
                            connection
                        }
                        Err(err) => {
                            self.release(index, None);
                            return Err(err);
                        }
                    },
                };
                return Ok(Some(PooledConnection {
                    group: Arc::clone(self),
                    index,
                    connection: Some(connection),
                    alive: true,
                }));
            }
            state = match deadline {
                None => self.released.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    self.released
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Returns a slot, parking `connection` when the group is still open.
    fn release(&self, index: usize, connection: Option<Connection>) {
        let to_close = {
            let mut state = self.lock_state();
            let closed = state.closed;
            match state.slots.get_mut(index) {
                Some(slot) => {
                    slot.held = false;
                    if closed {
                        connection
                    } else {
                        slot.connection = connection;
                        None
                    }
                }
                None => connection,
            }
        };
        self.released.notify_one();
        if let Some(connection) = to_close {
            close_quietly(self.database(), connection);
        }
    }

    /// Locks the slot state, recovering from poisoning.
    fn lock_state(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// SECTION: Scoped Connection
// ============================================================================

/// A held read connection; dropping it releases the slot.
pub struct PooledConnection {
    /// Owning group.
    group: Arc<ConnectionGroup>,
    /// Slot index within the group.
    index: usize,
    /// Handle, present until drop.
    connection: Option<Connection>,
    /// Cleared by [`PooledConnection::mark_dead`].
    alive: bool,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("database", &self.group.database())
            .field("index", &self.index)
            .field("alive", &self.alive)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    /// Returns the slot index this connection occupies.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.index
    }

    /// Returns the database name.
    #[must_use]
    pub fn database(&self) -> &str {
        self.group.database()
    }

    /// Marks the handle unusable; it is closed on release and the slot
    /// reopens lazily on next use.
    pub const fn mark_dead(&mut self) {
        self.alive = false;
    }

    /// Returns whether the handle is still considered usable.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.alive
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    #[allow(clippy::expect_used, reason = "The handle is only taken in Drop.")]
    fn deref(&self) -> &Connection {
        self.connection.as_ref().expect("pooled connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let connection = self.connection.take();
        if self.alive {
            self.group.release(self.index, connection);
        } else {
            if let Some(connection) = connection {
                close_quietly(self.group.database(), connection);
            }
            self.group.release(self.index, None);
        }
    }
}
