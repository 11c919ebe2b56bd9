use std::net::SocketAddr;

use bunchnet_connection::{ChannelHandler, ChannelRegistry};
use bunchnet_protocol::{ChannelType, InBunch};
use crossbeam_channel::Sender;
use tracing::error;

use crate::event_types::{Delivery, DriverEvent};

/// Channel types every driver connection accepts.
pub(crate) const KNOWN_CHANNEL_TYPES: [ChannelType; 4] =
    [ChannelType::CONTROL, ChannelType::ACTOR, ChannelType::FILE, ChannelType::VOICE];

/// Registry handing every channel of one connection a handler that forwards
/// its bunches to the driver's event channel.
#[derive(Debug)]
pub(crate) struct ForwardingRegistry {
    addr: SocketAddr,
    sender: Sender<DriverEvent>,
}

impl ForwardingRegistry {
    pub(crate) fn new(addr: SocketAddr, sender: Sender<DriverEvent>) -> Self {
        Self { addr, sender }
    }
}

impl ChannelRegistry for ForwardingRegistry {
    fn is_known_channel_type(&self, ch_type: ChannelType) -> bool {
        KNOWN_CHANNEL_TYPES.contains(&ch_type)
    }

    fn create_handler(&mut self, ch_type: ChannelType, ch_index: usize) -> Box<dyn ChannelHandler> {
        Box::new(ForwardingHandler { addr: self.addr, ch_type, ch_index, sender: self.sender.clone() })
    }
}

#[derive(Debug)]
struct ForwardingHandler {
    addr: SocketAddr,
    ch_type: ChannelType,
    ch_index: usize,
    sender: Sender<DriverEvent>,
}

impl ChannelHandler for ForwardingHandler {
    fn received_bunch(&mut self, bunch: &InBunch) {
        // Open and close markers carry nothing for the application.
        if bunch.num_bits() == 0 {
            return;
        }
        let delivery = Delivery {
            addr: self.addr,
            ch_index: self.ch_index,
            ch_type: self.ch_type,
            reliable: bunch.reliable,
            data: bunch.data().to_vec(),
            num_bits: bunch.num_bits(),
        };
        if self.sender.send(DriverEvent::Bunch(delivery)).is_err() {
            error!("Dropped bunch on channel {} from {}: event receiver is gone", self.ch_index, self.addr);
        }
    }
}
