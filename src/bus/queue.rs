//! Pending-frame queue
//!
//! Bounded FIFO between the transport and dispatch. When full, the oldest
//! frame is evicted so the transport side never blocks.

use std::collections::VecDeque;

use crate::frame::Frame;

/// Bounded drop-oldest frame queue
#[derive(Debug)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest if full
    ///
    /// Returns the number of frames evicted (0 or 1).
    pub fn push(&mut self, frame: Frame) -> u64 {
        let mut evicted = 0;
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
            evicted += 1;
        }
        self.frames.push_back(frame);
        evicted
    }

    /// Take the oldest frame
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Change the bound, evicting the oldest frames that no longer fit
    ///
    /// Returns the number of frames evicted.
    pub fn set_capacity(&mut self, capacity: usize) -> u64 {
        self.capacity = capacity.max(1);
        let mut evicted = 0;
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Channels of the queued frames, oldest first
    pub fn channels(&self) -> Vec<&str> {
        self.frames.iter().map(Frame::channel).collect()
    }
}
