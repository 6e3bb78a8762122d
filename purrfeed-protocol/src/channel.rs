//! Bounded FIFO transport between the two execution contexts
//!
//! Each direction is an [`InterCoreChannel`]: an embassy-sync channel of
//! encoded words plus an overflow marker. Pushing never blocks; a push into
//! a full queue drops the word and sets the marker, and the receiving side
//! reports [`ChannelError::Overflow`] on its next pop. Popping never blocks
//! either; callers poll.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use portable_atomic::{AtomicBool, Ordering};

use crate::command::{Command, Report};
use crate::message::{Message, MessageError};

/// Queue depth per direction (matches the RP2040 SIO FIFO)
pub const CHANNEL_DEPTH: usize = 8;

/// Errors surfaced by the receiving side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelError {
    /// One or more messages were dropped because the queue was full
    Overflow,
    /// A word could not be decoded
    Malformed(MessageError),
}

impl From<MessageError> for ChannelError {
    fn from(err: MessageError) -> Self {
        ChannelError::Malformed(err)
    }
}

/// One direction of the inter-context link
pub struct InterCoreChannel<const N: usize> {
    queue: Channel<CriticalSectionRawMutex, u32, N>,
    overflowed: AtomicBool,
}

impl<const N: usize> Default for InterCoreChannel<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> InterCoreChannel<N> {
    pub const fn new() -> Self {
        Self {
            queue: Channel::new(),
            overflowed: AtomicBool::new(false),
        }
    }

    /// Push a message without blocking
    ///
    /// Returns false if the queue was full. The loss is recorded and
    /// reported to the receiver.
    pub fn push(&self, msg: Message) -> bool {
        self.push_word(msg.encode())
    }

    /// Push a raw word without blocking
    pub fn push_word(&self, word: u32) -> bool {
        if self.queue.try_send(word).is_ok() {
            true
        } else {
            self.overflowed.store(true, Ordering::Release);
            false
        }
    }

    /// Pop the next message without blocking
    ///
    /// A pending overflow is reported once, ahead of the queued messages.
    pub fn pop(&self) -> Option<Result<Message, ChannelError>> {
        if self.overflowed.swap(false, Ordering::AcqRel) {
            return Some(Err(ChannelError::Overflow));
        }
        self.queue
            .try_receive()
            .ok()
            .map(|word| Message::decode(word).map_err(ChannelError::from))
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Both directions of the link
pub struct InterCoreLink<const N: usize = CHANNEL_DEPTH> {
    to_device: InterCoreChannel<N>,
    to_scheduler: InterCoreChannel<N>,
}

impl<const N: usize> Default for InterCoreLink<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> InterCoreLink<N> {
    pub const fn new() -> Self {
        Self {
            to_device: InterCoreChannel::new(),
            to_scheduler: InterCoreChannel::new(),
        }
    }

    /// Endpoint for the scheduling/communication context (A)
    pub fn scheduler(&self) -> Endpoint<'_, N> {
        Endpoint {
            tx: &self.to_device,
            rx: &self.to_scheduler,
        }
    }

    /// Endpoint for the device-coordination context (B)
    pub fn device(&self) -> Endpoint<'_, N> {
        Endpoint {
            tx: &self.to_scheduler,
            rx: &self.to_device,
        }
    }
}

/// One context's view of the link: its own outbound and inbound queues
#[derive(Clone, Copy)]
pub struct Endpoint<'a, const N: usize = CHANNEL_DEPTH> {
    tx: &'a InterCoreChannel<N>,
    rx: &'a InterCoreChannel<N>,
}

impl<'a, const N: usize> Endpoint<'a, N> {
    /// Send a message (best effort)
    pub fn send(&self, msg: Message) -> bool {
        self.tx.push(msg)
    }

    pub fn send_command(&self, cmd: Command) -> bool {
        self.send(cmd.to_message())
    }

    pub fn send_report(&self, report: Report) -> bool {
        self.send(report.to_message())
    }

    /// Receive the next message, if any
    pub fn receive(&self) -> Option<Result<Message, ChannelError>> {
        self.rx.pop()
    }

    /// Receive the next command (device side)
    pub fn receive_command(&self) -> Option<Result<Command, ChannelError>> {
        self.receive()
            .map(|res| res.and_then(|msg| Command::from_message(&msg).map_err(ChannelError::from)))
    }

    /// Receive the next report (scheduler side)
    pub fn receive_report(&self) -> Option<Result<Report, ChannelError>> {
        self.receive()
            .map(|res| res.and_then(|msg| Report::from_message(&msg).map_err(ChannelError::from)))
    }
}
