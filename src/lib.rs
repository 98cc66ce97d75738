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

//! Implementation of a hop-limited flood multicast publish/subscribe
//! protocol.
//!
//! Peers announce topic subscriptions to their neighbours; a published
//! message floods through the overlay, each hop delivering it to local
//! subscribers and forwarding it to every other interested peer until its
//! hop credit runs out. A time-bounded duplicate cache guarantees at most
//! one local delivery per message, and per-topic forward hooks let the
//! application veto forwarding on a per-peer basis.
//!
//! The [`Multicast`] behaviour is the dissemination engine; [`service`]
//! offers a listener-style API on top of a [`libp2p_swarm::Swarm`] of it.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use std::time::Duration;

use libp2p_identity::PeerId;

pub mod protocol;
pub mod service;

mod cache;
mod error;
mod handler;
mod layer;
mod peer;
mod topic;

mod proto {
    #![allow(unreachable_pub)]
    include!("generated/mod.rs");
    pub(crate) use self::multicast::pb::{mod_RPC::SubOpts, Message, RPC};
}

pub use self::{
    error::{Error, HookError},
    layer::{ForwardHook, Multicast, MulticastEvent},
    protocol::{MessageId, MulticastMessage, MulticastRpc},
    topic::Topic,
};

/// Configuration options for the multicast protocol.
#[derive(Debug, Clone)]
pub struct Config {
    /// Peer id of the local node. Used for the source of the messages that
    /// we publish.
    pub local_peer_id: PeerId,

    /// `true` if messages published by the local node should be delivered to
    /// its own subscribed listeners, `true` by default.
    pub subscribe_local_messages: bool,

    /// The maximum byte size for each record sent over a stream.
    pub max_transmit_size: usize,

    /// How long a message identifier suppresses repeated deliveries of the
    /// same message.
    pub duplicate_cache_ttl: Duration,
}

impl Config {
    pub fn new(local_peer_id: PeerId) -> Self {
        Self {
            local_peer_id,
            subscribe_local_messages: true,
            max_transmit_size: 2048,
            duplicate_cache_ttl: Duration::from_secs(30),
        }
    }
}
