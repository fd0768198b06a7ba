//! Event scheduling contract consumed by the PPU, plus a fixed-capacity heap implementation

use bincode::{Decode, Encode};
use ppu_proc_macros::EnumAll;
use std::array;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, EnumAll)]
pub enum SchedulerEvent {
    /// Next scanline state transition (drawing -> HBlank or HBlank -> next line)
    PpuLineState = 0,
    Dummy,
}

impl SchedulerEvent {
    fn as_bit(self) -> u32 {
        1 << (self as u8)
    }
}

/// What the PPU needs from the host's event scheduler.
///
/// Delays are relative to the scheduler's current cycle counter. When the scheduler fires an event
/// late it reports the lateness to the handler, which subtracts it from the next delay.
pub trait SchedulerInterface {
    fn cycles(&self) -> u64;

    fn schedule(&mut self, event: SchedulerEvent, relative_cycles: u64);

    fn cancel(&mut self, event: SchedulerEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
struct HeapEntry {
    event: SchedulerEvent,
    cycles: u64,
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cycles.cmp(&other.cycles)
    }
}

/// Min-heap of pending events with at most one entry per event type.
#[derive(Debug, Clone, Encode, Decode)]
pub struct Scheduler {
    heap: [HeapEntry; SchedulerEvent::ALL.len()],
    len: usize,
    scheduled_bits: u32,
    cycles: u64,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        // Initialize with a dummy event to avoid ever needing to check if the heap is empty
        Self {
            heap: array::from_fn(|_| HeapEntry { event: SchedulerEvent::Dummy, cycles: u64::MAX }),
            len: 1,
            scheduled_bits: SchedulerEvent::Dummy.as_bit(),
            cycles: 0,
        }
    }

    // Insert if event is not present, update cycles if it is present
    pub fn insert_or_update(&mut self, event: SchedulerEvent, cycles: u64) {
        log::trace!("Inserting event {event:?} at cycles {cycles}");

        if self.scheduled_bits & event.as_bit() != 0 {
            for i in 0..self.len {
                if self.heap[i].event != event {
                    continue;
                }

                let old_cycles = self.heap[i].cycles;
                self.heap[i].cycles = cycles;

                match cycles.cmp(&old_cycles) {
                    Ordering::Less => self.heap_up(i),
                    Ordering::Greater => self.heap_down(i),
                    Ordering::Equal => {}
                }

                return;
            }
        }
        self.scheduled_bits |= event.as_bit();

        self.heap[self.len] = HeapEntry { event, cycles };
        self.len += 1;
        self.heap_up(self.len - 1);
    }

    pub fn remove(&mut self, event: SchedulerEvent) {
        log::trace!("Removing event {event:?}");

        if self.scheduled_bits & event.as_bit() == 0 {
            return;
        }
        self.scheduled_bits &= !event.as_bit();

        for i in 0..self.len {
            if self.heap[i].event == event {
                let old_cycles = self.heap[i].cycles;
                self.heap.swap(i, self.len - 1);
                self.len -= 1;

                if i < self.len {
                    match self.heap[i].cycles.cmp(&old_cycles) {
                        Ordering::Less => self.heap_up(i),
                        Ordering::Greater => self.heap_down(i),
                        Ordering::Equal => {}
                    }
                }

                return;
            }
        }
    }

    #[must_use]
    pub fn next_event_cycles(&self) -> u64 {
        self.heap[0].cycles
    }

    #[must_use]
    pub fn is_event_ready(&self) -> bool {
        self.cycles >= self.heap[0].cycles
    }

    pub fn advance_to(&mut self, cycles: u64) {
        debug_assert!(cycles >= self.cycles, "scheduler clock moved backwards");
        self.cycles = cycles;
    }

    /// Pop the earliest event if it is due, returning the event and how many cycles late it is.
    pub fn pop_due(&mut self) -> Option<(SchedulerEvent, u64)> {
        if !self.is_event_ready() {
            return None;
        }

        let HeapEntry { event, cycles } = self.heap[0];
        self.heap.swap(0, self.len - 1);
        self.len -= 1;
        self.heap_down(0);
        self.scheduled_bits &= !event.as_bit();

        log::trace!("Popped event {event:?} at cycles {cycles} (now {})", self.cycles);

        Some((event, self.cycles - cycles))
    }

    fn heap_up(&mut self, mut i: usize) {
        while i != 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent] <= self.heap[i] {
                return;
            }

            self.heap.swap(i, parent);
            i = parent;
        }
    }

    fn heap_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            if left >= self.len {
                return;
            }
            let right = left + 1;

            let smallest =
                if right < self.len && self.heap[right] < self.heap[left] { right } else { left };
            if self.heap[smallest] >= self.heap[i] {
                return;
            }

            self.heap.swap(i, smallest);
            i = smallest;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerInterface for Scheduler {
    fn cycles(&self) -> u64 {
        self.cycles
    }

    fn schedule(&mut self, event: SchedulerEvent, relative_cycles: u64) {
        self.insert_or_update(event, self.cycles + relative_cycles);
    }

    fn cancel(&mut self, event: SchedulerEvent) {
        self.remove(event);
    }
}
