use std::collections::VecDeque;

use muxpipe_frame::Frame;

/// Default number of frames held while the link is down.
pub const DEFAULT_QUEUE_CAPACITY: usize = 65_536;

/// What to do with a new frame when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest queued frame to make room.
    #[default]
    DropOldest,
    /// Discard the incoming frame.
    DropNewest,
}

/// Bound for the multiplexer's pending frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum queued frames; `None` never drops anything.
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: Some(DEFAULT_QUEUE_CAPACITY),
            overflow: OverflowPolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Never drop frames. Memory grows for as long as the link stays down.
    pub fn unbounded() -> Self {
        Self {
            capacity: None,
            overflow: OverflowPolicy::default(),
        }
    }

    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            overflow,
        }
    }
}

/// Result of [`PendingQueue::push`].
#[derive(Debug, PartialEq, Eq)]
pub enum Pushed {
    Queued,
    /// The queue was full; this frame was evicted instead.
    Dropped(Frame),
}

/// FIFO of frames waiting for the sender.
#[derive(Debug)]
pub struct PendingQueue {
    frames: VecDeque<Frame>,
    config: QueueConfig,
}

impl PendingQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            frames: VecDeque::new(),
            config,
        }
    }

    /// Append `frame`, applying the overflow policy when full.
    pub fn push(&mut self, frame: Frame) -> Pushed {
        let full = match self.config.capacity {
            Some(capacity) => self.frames.len() >= capacity,
            None => false,
        };
        if !full {
            self.frames.push_back(frame);
            return Pushed::Queued;
        }

        match self.config.overflow {
            OverflowPolicy::DropNewest => Pushed::Dropped(frame),
            OverflowPolicy::DropOldest => {
                self.frames.push_back(frame);
                match self.frames.pop_front() {
                    Some(oldest) => Pushed::Dropped(oldest),
                    None => Pushed::Queued,
                }
            }
        }
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}
