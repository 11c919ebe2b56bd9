//! Collaborators that give channels their behaviour.
//!
//! The connection only knows how to frame, sequence and acknowledge bunches.
//! What a channel does with the bunches it receives is supplied from outside:
//! a [`ChannelRegistry`] creates a [`ChannelHandler`] for every channel type it
//! knows, and a [`ChannelNotify`] decides whether a channel opened by the
//! remote side is accepted.

use bunchnet_protocol::{ChannelType, InBunch};

use crate::channel::Channel;

/// What a handler wants done with its channel after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelRequest {
    /// Keep the channel open.
    #[default]
    Keep,
    /// Send a close bunch and tear the channel down once it is acknowledged.
    Close,
}

/// Channel type specific behaviour.
pub trait ChannelHandler: Send {
    /// Handles a bunch in delivery order. Reliable bunches arrive exactly
    /// once and in sequence; unreliable ones as they come.
    fn received_bunch(&mut self, bunch: &InBunch);

    /// Called once per connection tick.
    fn tick(&mut self) -> ChannelRequest {
        ChannelRequest::Keep
    }

    /// Called when the channel is destroyed.
    fn closed(&mut self) {}
}

/// Factory for channel handlers, keyed by channel type.
pub trait ChannelRegistry: Send {
    /// Returns true if channels of this type can be created.
    fn is_known_channel_type(&self, ch_type: ChannelType) -> bool;

    /// Creates the handler for a new channel at `ch_index`.
    fn create_handler(&mut self, ch_type: ChannelType, ch_index: usize) -> Box<dyn ChannelHandler>;
}

/// Decides whether a channel opened by the remote side may live.
pub trait ChannelNotify: Send {
    /// Returns false to refuse the channel; the connection then closes it again.
    fn accept_channel(&mut self, channel: &Channel) -> bool;
}

/// Accepts every channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ChannelNotify for AcceptAll {
    fn accept_channel(&mut self, _channel: &Channel) -> bool {
        true
    }
}

/// Handler that ignores everything it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardHandler;

impl ChannelHandler for DiscardHandler {
    fn received_bunch(&mut self, _bunch: &InBunch) {}
}

/// Registry knowing a fixed set of channel types, all handled by a closure.
pub struct FnRegistry<F> {
    known: Vec<ChannelType>,
    factory: F,
}

impl<F> FnRegistry<F>
where
    F: FnMut(ChannelType, usize) -> Box<dyn ChannelHandler> + Send,
{
    /// Creates a registry for `known` types.
    pub fn new(known: impl IntoIterator<Item = ChannelType>, factory: F) -> Self {
        Self { known: known.into_iter().collect(), factory }
    }
}

impl<F> ChannelRegistry for FnRegistry<F>
where
    F: FnMut(ChannelType, usize) -> Box<dyn ChannelHandler> + Send,
{
    fn is_known_channel_type(&self, ch_type: ChannelType) -> bool {
        self.known.contains(&ch_type)
    }

    fn create_handler(&mut self, ch_type: ChannelType, ch_index: usize) -> Box<dyn ChannelHandler> {
        (self.factory)(ch_type, ch_index)
    }
}
