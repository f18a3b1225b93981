//! Priority queues and the flush strategy.
//!
//! Three queues, high / medium / low. The flush strategy is a string of
//! priority letters walked round-robin: each flush opportunity serves
//! the queue named by the next letter, falling back to the others when
//! it is empty. Order within a priority is always submission order; a
//! frame partially written when the socket stalled stays at the head of
//! its queue.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::{ChannelError, Result};

/// Write priority of an output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Served most often by the default strategy.
    #[default]
    High,
    /// Middle band.
    Medium,
    /// Served least often.
    Low,
}

impl Priority {
    fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

/// A validated flush strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushStrategy {
    order: Vec<Priority>,
    cursor: usize,
}

impl FlushStrategy {
    /// Parse a strategy string of `H`/`M`/`L` letters.
    ///
    /// # Errors
    ///
    /// `ChannelError::InvalidArgument` for other characters or an empty
    /// string.
    pub fn parse(strategy: &str) -> Result<Self> {
        if strategy.is_empty() {
            return Err(ChannelError::InvalidArgument("empty flush strategy"));
        }
        let order = strategy
            .chars()
            .map(|c| match c.to_ascii_uppercase() {
                'H' => Ok(Priority::High),
                'M' => Ok(Priority::Medium),
                'L' => Ok(Priority::Low),
                _ => Err(ChannelError::InvalidArgument("flush strategy letters are H, M, L")),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { order, cursor: 0 })
    }

    /// The priority the next flush tick serves first.
    fn next(&mut self) -> Priority {
        let priority = self.order[self.cursor % self.order.len()];
        self.cursor = (self.cursor + 1) % self.order.len();
        priority
    }
}

/// The three output queues plus byte accounting.
#[derive(Debug, Default)]
pub struct PriorityQueues {
    queues: [VecDeque<Bytes>; 3],
    queued_bytes: usize,
}

impl PriorityQueues {
    /// Append a frame at the given priority.
    pub fn push(&mut self, priority: Priority, frame: Bytes) {
        self.queued_bytes += frame.len();
        self.queues[priority.index()].push_back(frame);
    }

    /// Put a partially-unwritten frame back at the head of its queue
    /// for retry on the next write opportunity.
    pub fn push_front(&mut self, priority: Priority, frame: Bytes) {
        self.queued_bytes += frame.len();
        self.queues[priority.index()].push_front(frame);
    }

    /// Bytes queued across all priorities; the high-water mark compares
    /// against this.
    #[must_use]
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queued_bytes == 0
    }

    /// Pop the next frame to write, honoring the strategy: the named
    /// queue first, then the others in priority order.
    pub fn pop_for_flush(&mut self, strategy: &mut FlushStrategy) -> Option<(Priority, Bytes)> {
        if self.is_empty() {
            return None;
        }
        let first = strategy.next();
        let candidates = [
            first,
            Priority::High,
            Priority::Medium,
            Priority::Low,
        ];
        for priority in candidates {
            if let Some(frame) = self.queues[priority.index()].pop_front() {
                self.queued_bytes -= frame.len();
                return Some((priority, frame));
            }
        }
        None
    }

    /// Drop everything queued; used on fatal errors.
    pub fn clear(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        self.queued_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Bytes {
        Bytes::from(vec![tag; 4])
    }

    #[test]
    fn strategy_rejects_bad_letters() {
        assert!(FlushStrategy::parse("HMXL").is_err());
        assert!(FlushStrategy::parse("").is_err());
        assert!(FlushStrategy::parse("hml").is_ok());
    }

    #[test]
    fn strategy_governs_interleaving_but_not_intra_priority_order() {
        let mut strategy = FlushStrategy::parse("HMHLHM").unwrap();
        let mut queues = PriorityQueues::default();
        for i in 0..3 {
            queues.push(Priority::High, frame(0x10 + i));
            queues.push(Priority::Medium, frame(0x20 + i));
            queues.push(Priority::Low, frame(0x30 + i));
        }

        let mut order = Vec::new();
        while let Some((_, f)) = queues.pop_for_flush(&mut strategy) {
            order.push(f[0]);
        }

        // H M H L H M -> then only M/L remain, drained priority-first.
        assert_eq!(order, vec![0x10, 0x20, 0x11, 0x30, 0x12, 0x21, 0x22, 0x31, 0x32]);

        // Within each priority, submission order held.
        let highs: Vec<_> = order.iter().filter(|t| **t & 0xF0 == 0x10).collect();
        assert_eq!(highs, vec![&0x10, &0x11, &0x12]);
    }

    #[test]
    fn byte_accounting_tracks_push_and_pop() {
        let mut strategy = FlushStrategy::parse("H").unwrap();
        let mut queues = PriorityQueues::default();
        queues.push(Priority::High, frame(1));
        queues.push(Priority::Low, frame(2));
        assert_eq!(queues.queued_bytes(), 8);

        let (priority, popped) = queues.pop_for_flush(&mut strategy).unwrap();
        assert_eq!(priority, Priority::High);
        assert_eq!(queues.queued_bytes(), 4);

        queues.push_front(priority, popped);
        assert_eq!(queues.queued_bytes(), 8);
        let (again, _) = queues.pop_for_flush(&mut strategy).unwrap();
        assert_eq!(again, Priority::High);
    }
}
