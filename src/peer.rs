// Copyright 2018 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

use std::collections::BTreeSet;

use libp2p_swarm::ConnectionId;
use smallvec::SmallVec;

use crate::{
    protocol::{MulticastSubscription, MulticastSubscriptionAction},
    topic::Topic,
};

/// State kept for every connected peer.
///
/// The connection list doubles as the record's reference count: the record
/// is removed from the peer map when the last connection closes, so the
/// count cannot go negative. The outbound stream itself lives in the
/// connection handler; a peer is writable exactly while a connection to it
/// is established.
#[derive(Debug, Default)]
pub(crate) struct PeerState {
    /// Its current connections.
    pub(crate) connections: SmallVec<[ConnectionId; 2]>,
    /// Topics the remote has announced.
    pub(crate) topics: BTreeSet<Topic>,
}

impl PeerState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether records can currently be scheduled for this peer.
    pub(crate) fn is_writable(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Applies one subscription delta to the announced topic set.
    ///
    /// Deltas must be applied in the order they arrived on the stream.
    /// Returns `true` if the set changed.
    pub(crate) fn apply(&mut self, subscription: &MulticastSubscription) -> bool {
        match subscription.action {
            MulticastSubscriptionAction::Subscribe => {
                self.topics.insert(subscription.topic.clone())
            }
            MulticastSubscriptionAction::Unsubscribe => self.topics.remove(&subscription.topic),
        }
    }

    /// Whether the peer has announced interest in the given topic.
    pub(crate) fn is_subscribed_to(&self, topic: &Topic) -> bool {
        self.topics.contains(topic)
    }
}
