//! Lease table with a rotating cursor

use std::sync::Mutex;
use tracing::{debug, warn};

use crate::{PoolError, PortAllocator};

/// First port handed out when no range is configured.
pub const DEFAULT_PORT_RANGE_START: u16 = 20001;
/// Last port (inclusive) handed out when no range is configured.
pub const DEFAULT_PORT_RANGE_END: u16 = 65000;

/// Thread-safe allocator over an inclusive port range.
///
/// Acquisition scans forward from a cursor that sits just past the most
/// recently leased port, wrapping at the end of the range, so freshly
/// released ports are not handed out again until the rest of the range has
/// been tried.
pub struct PortPool {
    range_start: u16,
    range_end: u16,
    state: Mutex<LeaseTable>,
}

struct LeaseTable {
    /// `leased[i]` tracks port `range_start + i`.
    leased: Vec<bool>,
    cursor: usize,
    in_use: usize,
}

impl PortPool {
    pub fn new(range_start: u16, range_end: u16) -> Result<Self, PoolError> {
        if range_start == 0 || range_start > range_end {
            return Err(PoolError::InvalidRange {
                start: range_start,
                end: range_end,
            });
        }

        Ok(Self::with_range(range_start, range_end))
    }

    fn with_range(range_start: u16, range_end: u16) -> Self {
        let size = (range_end - range_start) as usize + 1;
        Self {
            range_start,
            range_end,
            state: Mutex::new(LeaseTable {
                leased: vec![false; size],
                cursor: 0,
                in_use: 0,
            }),
        }
    }

    /// Inclusive bounds of the pool.
    pub fn range(&self) -> (u16, u16) {
        (self.range_start, self.range_end)
    }

    /// Number of ports the pool manages.
    pub fn capacity(&self) -> usize {
        (self.range_end - self.range_start) as usize + 1
    }

    pub fn leased_count(&self) -> usize {
        self.table().in_use
    }

    pub fn available_count(&self) -> usize {
        self.capacity() - self.leased_count()
    }

    pub fn is_leased(&self, port: u16) -> bool {
        match self.index_of(port) {
            Some(index) => self.table().leased[index],
            None => false,
        }
    }

    fn index_of(&self, port: u16) -> Option<usize> {
        if port < self.range_start || port > self.range_end {
            return None;
        }
        Some((port - self.range_start) as usize)
    }

    fn table(&self) -> std::sync::MutexGuard<'_, LeaseTable> {
        // A panic elsewhere while holding the lock cannot leave a half-flipped
        // entry, so the table is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PortPool {
    fn default() -> Self {
        Self::with_range(DEFAULT_PORT_RANGE_START, DEFAULT_PORT_RANGE_END)
    }
}

impl PortAllocator for PortPool {
    fn acquire(&self) -> Result<u16, PoolError> {
        let leased = {
            let mut table = self.table();
            let size = table.leased.len();
            let start = table.cursor;

            let free = (0..size)
                .map(|step| (start + step) % size)
                .find(|&index| !table.leased[index]);

            free.map(|index| {
                table.leased[index] = true;
                table.cursor = (index + 1) % size;
                table.in_use += 1;
                (index, table.in_use)
            })
        };

        match leased {
            Some((index, in_use)) => {
                let port = self.range_start + index as u16;
                debug!("Leased port {} ({} in use)", port, in_use);
                Ok(port)
            }
            None => {
                warn!(
                    "Port pool exhausted ({}-{})",
                    self.range_start, self.range_end
                );
                Err(PoolError::Exhausted {
                    start: self.range_start,
                    end: self.range_end,
                })
            }
        }
    }

    fn release(&self, port: u16) -> Result<(), PoolError> {
        let index = self.index_of(port).ok_or(PoolError::OutOfRange {
            port,
            start: self.range_start,
            end: self.range_end,
        })?;

        let in_use = {
            let mut table = self.table();
            if !table.leased[index] {
                return Err(PoolError::NotLeased { port });
            }
            table.leased[index] = false;
            table.in_use -= 1;
            table.in_use
        };

        debug!("Released port {} ({} in use)", port, in_use);
        Ok(())
    }
}
