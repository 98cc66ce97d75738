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

use std::{fmt::Write as _, io, iter};

use asynchronous_codec::Framed;
use bytes::{Bytes, BytesMut};
use futures::{
    future,
    io::{AsyncRead, AsyncWrite},
};
use libp2p_core::{InboundUpgrade, OutboundUpgrade, UpgradeInfo};
use libp2p_identity::PeerId;
use libp2p_swarm::StreamProtocol;

use crate::{proto, topic::Topic};

/// The protocol identifier negotiated for multicast substreams.
pub(crate) const PROTOCOL_NAME: StreamProtocol = StreamProtocol::new("/multicast/0.0.1");

/// Implementation of `ConnectionUpgrade` for the multicast protocol.
///
/// A negotiated substream is wrapped into a [`Framed`] codec; the same
/// upgrade serves both directions.
#[derive(Debug, Clone)]
pub struct MulticastProtocol {
    max_transmit_size: usize,
}

impl MulticastProtocol {
    /// Builds a new `MulticastProtocol` enforcing the given maximum frame
    /// size on both directions.
    pub fn new(max_transmit_size: usize) -> MulticastProtocol {
        MulticastProtocol { max_transmit_size }
    }
}

impl UpgradeInfo for MulticastProtocol {
    type Info = StreamProtocol;
    type InfoIter = iter::Once<Self::Info>;

    fn protocol_info(&self) -> Self::InfoIter {
        iter::once(PROTOCOL_NAME)
    }
}

impl<TSocket> InboundUpgrade<TSocket> for MulticastProtocol
where
    TSocket: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Output = Framed<TSocket, MulticastCodec>;
    type Error = io::Error;
    type Future = future::Ready<Result<Self::Output, Self::Error>>;

    fn upgrade_inbound(self, socket: TSocket, _: Self::Info) -> Self::Future {
        future::ok(Framed::new(
            socket,
            MulticastCodec::new(self.max_transmit_size),
        ))
    }
}

impl<TSocket> OutboundUpgrade<TSocket> for MulticastProtocol
where
    TSocket: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Output = Framed<TSocket, MulticastCodec>;
    type Error = io::Error;
    type Future = future::Ready<Result<Self::Output, Self::Error>>;

    fn upgrade_outbound(self, socket: TSocket, _: Self::Info) -> Self::Future {
        future::ok(Framed::new(
            socket,
            MulticastCodec::new(self.max_transmit_size),
        ))
    }
}

/// Codec for the framing: an unsigned varint length prefix followed by the
/// protobuf body.
///
/// Decoding canonicalizes the wire representation into [`MulticastRpc`];
/// a record that cannot be decoded terminates the stream it arrived on.
pub struct MulticastCodec {
    codec: quick_protobuf_codec::Codec<proto::RPC>,
}

impl MulticastCodec {
    fn new(max_transmit_size: usize) -> Self {
        MulticastCodec {
            codec: quick_protobuf_codec::Codec::new(max_transmit_size),
        }
    }
}

impl asynchronous_codec::Encoder for MulticastCodec {
    type Item<'a> = proto::RPC;
    type Error = quick_protobuf_codec::Error;

    fn encode(&mut self, item: Self::Item<'_>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.codec.encode(item, dst)
    }
}

impl asynchronous_codec::Decoder for MulticastCodec {
    type Item = MulticastRpc;
    type Error = MulticastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(rpc) = self.codec.decode(src).map_err(CodecError)? else {
            return Ok(None);
        };

        MulticastRpc::from_proto(rpc).map(Some)
    }
}

/// Reach attempt interrupt errors.
#[derive(thiserror::Error, Debug)]
pub enum MulticastError {
    /// Error when parsing the `PeerId` in the message.
    #[error("Failed to decode PeerId from message")]
    InvalidPeerId,
    /// Error when decoding the raw buffer into a protobuf.
    #[error("Failed to decode protobuf")]
    ProtobufError(#[from] CodecError),
    /// Error when reading the packet from the socket.
    #[error("Failed to read from socket")]
    ReadError(#[from] io::Error),
}

#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct CodecError(#[from] quick_protobuf_codec::Error);

/// An RPC received by the multicast system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MulticastRpc {
    /// List of messages that were part of this RPC query.
    pub messages: Vec<MulticastMessage>,
    /// List of subscriptions.
    pub subscriptions: Vec<MulticastSubscription>,
}

impl MulticastRpc {
    /// Whether the record carries neither messages nor subscription deltas.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.subscriptions.is_empty()
    }

    pub(crate) fn from_proto(rpc: proto::RPC) -> Result<MulticastRpc, MulticastError> {
        let mut messages = Vec::with_capacity(rpc.msgs.len());
        for publish in rpc.msgs.into_iter() {
            messages.push(MulticastMessage {
                source: PeerId::from_bytes(&publish.from.unwrap_or_default())
                    .map_err(|_| MulticastError::InvalidPeerId)?,
                data: publish.data.unwrap_or_default().into(),
                sequence_number: publish.seqno.unwrap_or_default(),
                hops: publish.hops.unwrap_or(0),
                topics: publish.topicIDs.into_iter().map(Topic::new).collect(),
            });
        }

        Ok(MulticastRpc {
            messages,
            subscriptions: rpc
                .subscriptions
                .into_iter()
                .map(|sub| MulticastSubscription {
                    action: if Some(true) == sub.subscribe {
                        MulticastSubscriptionAction::Subscribe
                    } else {
                        MulticastSubscriptionAction::Unsubscribe
                    },
                    topic: Topic::new(sub.topicCID.unwrap_or_default()),
                })
                .collect(),
        })
    }

    /// Turns this `MulticastRpc` into a message that can be sent to a
    /// substream.
    pub(crate) fn into_proto(self) -> proto::RPC {
        proto::RPC {
            msgs: self
                .messages
                .into_iter()
                .map(|msg| proto::Message {
                    from: Some(msg.source.to_bytes()),
                    data: Some(msg.data.to_vec()),
                    seqno: Some(msg.sequence_number),
                    hops: Some(msg.hops),
                    topicIDs: msg.topics.into_iter().map(|topic| topic.into()).collect(),
                })
                .collect(),

            subscriptions: self
                .subscriptions
                .into_iter()
                .map(|sub| proto::SubOpts {
                    subscribe: Some(sub.action == MulticastSubscriptionAction::Subscribe),
                    topicCID: Some(sub.topic.into()),
                })
                .collect(),
        }
    }
}

/// A message received by the multicast system.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MulticastMessage {
    /// Id of the peer that published this message.
    pub source: PeerId,

    /// Content of the message. Its meaning is out of scope of this library.
    pub data: Bytes,

    /// An opaque sequence identifier, unique per source within the
    /// deduplication window.
    pub sequence_number: Vec<u8>,

    /// Remaining forwards allowed. A message arriving with 0 is delivered
    /// locally but not forwarded; positive values are decremented once per
    /// hop; negative values forward unbounded.
    pub hops: i32,

    /// List of topics this message belongs to.
    ///
    /// Each message can belong to multiple topics at once.
    pub topics: Vec<Topic>,
}

impl MulticastMessage {
    /// The deduplication identifier of this message: the source peer in its
    /// textual form followed by the hex form of the sequence number.
    pub fn id(&self) -> MessageId {
        let mut id = self.source.to_base58();
        for byte in &self.sequence_number {
            write!(id, "{byte:02x}").expect("writing to a String never fails");
        }
        MessageId(id)
    }
}

/// A type for multicast message ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subscription received by the multicast system.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MulticastSubscription {
    /// Action to perform.
    pub action: MulticastSubscriptionAction,
    /// The topic to subscribe to or unsubscribe from.
    pub topic: Topic,
}

/// Action that a subscription wants to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MulticastSubscriptionAction {
    /// The remote wants to subscribe to the given topic.
    Subscribe,
    /// The remote wants to unsubscribe from the given topic.
    Unsubscribe,
}
