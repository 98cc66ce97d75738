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

use std::{
    io,
    task::{Context, Poll},
};

use asynchronous_codec::Framed;
use futures::{SinkExt, StreamExt};
use libp2p_swarm::{
    handler::{
        ConnectionEvent, ConnectionHandler, ConnectionHandlerEvent, DialUpgradeError,
        FullyNegotiatedInbound, FullyNegotiatedOutbound, SubstreamProtocol,
    },
    Stream,
};
use smallvec::SmallVec;

use crate::protocol::{MulticastCodec, MulticastError, MulticastProtocol, MulticastRpc};

/// Protocol handler that handles communication with the remote for the
/// multicast protocol.
///
/// One long-lived substream per direction: the inbound substream decodes
/// records pushed by the remote, the outbound substream drains the queue of
/// records scheduled by the engine. The outbound substream is opened lazily
/// when the first record is queued.
pub struct Handler {
    /// Upgrade configuration for the multicast protocol.
    listen_protocol: MulticastProtocol,

    /// The single long-lived inbound substream.
    inbound_substream: Option<InboundSubstreamState>,

    /// The single long-lived outbound substream.
    outbound_substream: Option<OutboundSubstreamState>,

    /// Whether an outbound substream is currently being negotiated.
    outbound_substream_establishing: bool,

    /// Queue of values that we want to send to the remote.
    send_queue: SmallVec<[MulticastRpc; 16]>,
}

/// State of the inbound substream.
enum InboundSubstreamState {
    /// Waiting for a message from the remote.
    WaitingInput(Framed<Stream, MulticastCodec>),
    /// The substream is being closed.
    Closing(Framed<Stream, MulticastCodec>),
    /// An error occurred during processing.
    Poisoned,
}

/// State of the outbound substream.
enum OutboundSubstreamState {
    /// Waiting for the user to send a message.
    WaitingOutput(Framed<Stream, MulticastCodec>),
    /// Waiting to send a message to the remote.
    PendingSend(Framed<Stream, MulticastCodec>, MulticastRpc),
    /// Waiting to flush the substream so that the data arrives to the remote.
    PendingFlush(Framed<Stream, MulticastCodec>),
    /// An error occurred during processing.
    Poisoned,
}

/// Event emitted towards the behaviour.
#[derive(Debug)]
pub enum HandlerEvent {
    /// An RPC was received from the remote.
    Rpc(MulticastRpc),
    /// The inbound stream ended or failed to decode; the peer can no longer
    /// reach us on this connection.
    StreamError(MulticastError),
}

impl Handler {
    /// Builds a new `Handler`.
    pub(crate) fn new(listen_protocol: MulticastProtocol) -> Self {
        Handler {
            listen_protocol,
            inbound_substream: None,
            outbound_substream: None,
            outbound_substream_establishing: false,
            send_queue: SmallVec::new(),
        }
    }
}

impl ConnectionHandler for Handler {
    type FromBehaviour = MulticastRpc;
    type ToBehaviour = HandlerEvent;
    type InboundProtocol = MulticastProtocol;
    type OutboundProtocol = MulticastProtocol;
    type InboundOpenInfo = ();
    type OutboundOpenInfo = ();

    fn listen_protocol(&self) -> SubstreamProtocol<Self::InboundProtocol, Self::InboundOpenInfo> {
        SubstreamProtocol::new(self.listen_protocol.clone(), ())
    }

    fn on_behaviour_event(&mut self, rpc: Self::FromBehaviour) {
        self.send_queue.push(rpc);
    }

    fn on_connection_event(
        &mut self,
        event: ConnectionEvent<
            Self::InboundProtocol,
            Self::OutboundProtocol,
            Self::InboundOpenInfo,
            Self::OutboundOpenInfo,
        >,
    ) {
        match event {
            ConnectionEvent::FullyNegotiatedInbound(FullyNegotiatedInbound {
                protocol: substream,
                ..
            }) => {
                self.inbound_substream = Some(InboundSubstreamState::WaitingInput(substream));
            }
            ConnectionEvent::FullyNegotiatedOutbound(FullyNegotiatedOutbound {
                protocol: substream,
                ..
            }) => {
                self.outbound_substream_establishing = false;
                self.outbound_substream = Some(OutboundSubstreamState::WaitingOutput(substream));
            }
            ConnectionEvent::DialUpgradeError(DialUpgradeError { error, .. }) => {
                self.outbound_substream_establishing = false;
                tracing::debug!("Failed to open outbound multicast substream: {error}");
                // Anything already scheduled is lost; the dial hook will
                // re-synchronize subscriptions on a fresh connection.
                self.send_queue.clear();
            }
            _ => {}
        }
    }

    fn poll(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<
        ConnectionHandlerEvent<Self::OutboundProtocol, Self::OutboundOpenInfo, Self::ToBehaviour>,
    > {
        // Open an outbound substream as soon as there is something to send.
        if !self.send_queue.is_empty()
            && self.outbound_substream.is_none()
            && !self.outbound_substream_establishing
        {
            self.outbound_substream_establishing = true;
            return Poll::Ready(ConnectionHandlerEvent::OutboundSubstreamRequest {
                protocol: SubstreamProtocol::new(self.listen_protocol.clone(), ()),
            });
        }

        loop {
            match std::mem::replace(
                &mut self.inbound_substream,
                Some(InboundSubstreamState::Poisoned),
            ) {
                Some(InboundSubstreamState::WaitingInput(mut substream)) => {
                    match substream.poll_next_unpin(cx) {
                        Poll::Ready(Some(Ok(rpc))) => {
                            self.inbound_substream =
                                Some(InboundSubstreamState::WaitingInput(substream));
                            return Poll::Ready(ConnectionHandlerEvent::NotifyBehaviour(
                                HandlerEvent::Rpc(rpc),
                            ));
                        }
                        Poll::Ready(Some(Err(error))) => {
                            self.inbound_substream =
                                Some(InboundSubstreamState::Closing(substream));
                            return Poll::Ready(ConnectionHandlerEvent::NotifyBehaviour(
                                HandlerEvent::StreamError(error),
                            ));
                        }
                        Poll::Ready(None) => {
                            self.inbound_substream =
                                Some(InboundSubstreamState::Closing(substream));
                            return Poll::Ready(ConnectionHandlerEvent::NotifyBehaviour(
                                HandlerEvent::StreamError(MulticastError::ReadError(
                                    io::ErrorKind::UnexpectedEof.into(),
                                )),
                            ));
                        }
                        Poll::Pending => {
                            self.inbound_substream =
                                Some(InboundSubstreamState::WaitingInput(substream));
                            break;
                        }
                    }
                }
                Some(InboundSubstreamState::Closing(mut substream)) => {
                    match substream.poll_close_unpin(cx) {
                        Poll::Ready(_) => {
                            self.inbound_substream = None;
                            break;
                        }
                        Poll::Pending => {
                            self.inbound_substream =
                                Some(InboundSubstreamState::Closing(substream));
                            break;
                        }
                    }
                }
                Some(InboundSubstreamState::Poisoned) => {
                    unreachable!("inbound substream is only taken within this loop")
                }
                None => {
                    self.inbound_substream = None;
                    break;
                }
            }
        }

        loop {
            match std::mem::replace(
                &mut self.outbound_substream,
                Some(OutboundSubstreamState::Poisoned),
            ) {
                Some(OutboundSubstreamState::WaitingOutput(substream)) => {
                    if self.send_queue.is_empty() {
                        self.outbound_substream =
                            Some(OutboundSubstreamState::WaitingOutput(substream));
                        break;
                    }
                    let rpc = self.send_queue.remove(0);
                    self.outbound_substream =
                        Some(OutboundSubstreamState::PendingSend(substream, rpc));
                }
                Some(OutboundSubstreamState::PendingSend(mut substream, rpc)) => {
                    match substream.poll_ready_unpin(cx) {
                        Poll::Ready(Ok(())) => {
                            if let Err(error) = substream.start_send_unpin(rpc.into_proto()) {
                                tracing::debug!("Failed to send multicast record: {error}");
                                self.outbound_substream = None;
                                break;
                            }
                            self.outbound_substream =
                                Some(OutboundSubstreamState::PendingFlush(substream));
                        }
                        Poll::Ready(Err(error)) => {
                            tracing::debug!("Outbound multicast substream failed: {error}");
                            self.outbound_substream = None;
                            break;
                        }
                        Poll::Pending => {
                            self.outbound_substream =
                                Some(OutboundSubstreamState::PendingSend(substream, rpc));
                            break;
                        }
                    }
                }
                Some(OutboundSubstreamState::PendingFlush(mut substream)) => {
                    match substream.poll_flush_unpin(cx) {
                        Poll::Ready(Ok(())) => {
                            self.outbound_substream =
                                Some(OutboundSubstreamState::WaitingOutput(substream));
                        }
                        Poll::Ready(Err(error)) => {
                            tracing::debug!("Failed to flush multicast substream: {error}");
                            self.outbound_substream = None;
                            break;
                        }
                        Poll::Pending => {
                            self.outbound_substream =
                                Some(OutboundSubstreamState::PendingFlush(substream));
                            break;
                        }
                    }
                }
                Some(OutboundSubstreamState::Poisoned) => {
                    unreachable!("outbound substream is only taken within this loop")
                }
                None => {
                    self.outbound_substream = None;
                    break;
                }
            }
        }

        Poll::Pending
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        f.debug_struct("Handler")
            .field("inbound", &self.inbound_substream.is_some())
            .field("outbound", &self.outbound_substream.is_some())
            .field("send_queue", &self.send_queue.len())
            .finish()
    }
}
