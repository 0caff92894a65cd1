//! Deficit-round-robin scheduling of writable streams, so one bulk stream
//! cannot starve its siblings of packet space.

use std::collections::VecDeque;

use crate::StreamId;

/// Weighted round-robin over streams with byte-granular fairness.
///
/// Every stream carries a weight; a visit grants `quantum × weight` bytes
/// of deficit, and a stream may emit as long as its deficit covers the next
/// chunk. The caller supplies an `is_ready` closure returning the size of
/// the chunk a stream would send, or `None` when it has nothing to say.
#[derive(Debug, Clone)]
pub struct StreamScheduler {
    quantum: i32,
    /// Active streams in service order, with their weight and deficit.
    queue: VecDeque<Entry>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: StreamId,
    weight: u8,
    deficit: i32,
    credited: bool,
}

const MAX_DEFICIT: i32 = 1 << 20;

impl StreamScheduler {
    pub fn new(quantum: usize) -> Self {
        Self {
            quantum: quantum as i32,
            queue: VecDeque::new(),
        }
    }

    pub fn set_quantum(&mut self, quantum: usize) {
        self.quantum = quantum as i32;
    }

    /// Adds a stream (or updates its weight). Weight 0 is clamped to 1.
    pub fn register(&mut self, id: StreamId, weight: u8) {
        let weight = weight.max(1);
        if let Some(entry) = self.queue.iter_mut().find(|e| e.id == id) {
            entry.weight = weight;
            return;
        }
        self.queue.push_back(Entry {
            id,
            weight,
            deficit: 0,
            credited: false,
        });
    }

    pub fn remove(&mut self, id: StreamId) {
        self.queue.retain(|e| e.id != id);
    }

    /// Picks the next stream allowed to emit a chunk, charging its deficit.
    pub fn next_stream<F>(&mut self, mut is_ready: F) -> Option<StreamId>
    where
        F: FnMut(StreamId) -> Option<usize>,
    {
        let rounds = self.queue.len();
        for _ in 0..rounds {
            let mut entry = self.queue.pop_front()?;

            let Some(size) = is_ready(entry.id) else {
                entry.credited = false;
                self.queue.push_back(entry);
                continue;
            };

            if !entry.credited {
                entry.deficit =
                    (entry.deficit + self.quantum * entry.weight as i32).min(MAX_DEFICIT);
                entry.credited = true;
            }

            if entry.deficit >= size as i32 {
                entry.deficit -= size as i32;
                let id = entry.id;
                // Stay in front while credit remains, so a stream drains its
                // quantum in consecutive chunks.
                if entry.deficit > 0 {
                    self.queue.push_front(entry);
                } else {
                    entry.credited = false;
                    self.queue.push_back(entry);
                }
                return Some(id);
            }

            // Quantum exhausted; next visit re-credits.
            entry.credited = false;
            self.queue.push_back(entry);
        }
        None
    }
}
