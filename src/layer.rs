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
    collections::{HashMap, VecDeque},
    fmt, iter,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use libp2p_core::{transport::PortUse, Endpoint, Multiaddr};
use libp2p_identity::PeerId;
use libp2p_swarm::{
    behaviour::{ConnectionClosed, ConnectionEstablished, FromSwarm},
    CloseConnection, ConnectionDenied, ConnectionId, NetworkBehaviour, NotifyHandler, THandler,
    THandlerInEvent, THandlerOutEvent, ToSwarm,
};
use smallvec::SmallVec;

use crate::{
    cache::DuplicateCache,
    error::{Error, HookError},
    handler::{Handler, HandlerEvent},
    peer::PeerState,
    protocol::{
        MessageId, MulticastMessage, MulticastProtocol, MulticastRpc, MulticastSubscription,
        MulticastSubscriptionAction,
    },
    topic::Topic,
    Config,
};

/// An asynchronous per-topic predicate consulted before a message is
/// forwarded to a specific peer.
///
/// All hooks registered for a topic must admit a message for it to pass that
/// topic; a synchronous predicate is the degenerate case and can be wrapped
/// with [`ForwardHook::from_fn`]. Hooks are compared by identity, so keep a
/// clone of the hook around in order to remove it again.
pub struct ForwardHook {
    hook: Arc<
        dyn Fn(&PeerId, &MulticastMessage) -> BoxFuture<'static, Result<bool, HookError>>
            + Send
            + Sync,
    >,
}

impl ForwardHook {
    /// Builds a hook from an asynchronous predicate.
    pub fn new<F>(hook: F) -> ForwardHook
    where
        F: Fn(&PeerId, &MulticastMessage) -> BoxFuture<'static, Result<bool, HookError>>
            + Send
            + Sync
            + 'static,
    {
        ForwardHook {
            hook: Arc::new(hook),
        }
    }

    /// Builds a hook from a synchronous predicate.
    pub fn from_fn<F>(predicate: F) -> ForwardHook
    where
        F: Fn(&PeerId, &MulticastMessage) -> bool + Send + Sync + 'static,
    {
        ForwardHook::new(move |peer, message| {
            futures::future::ready(Ok(predicate(peer, message))).boxed()
        })
    }

    fn call(
        &self,
        peer: &PeerId,
        message: &MulticastMessage,
    ) -> BoxFuture<'static, Result<bool, HookError>> {
        (self.hook)(peer, message)
    }

    fn is(&self, other: &ForwardHook) -> bool {
        Arc::ptr_eq(&self.hook, &other.hook)
    }
}

impl Clone for ForwardHook {
    fn clone(&self) -> Self {
        ForwardHook {
            hook: self.hook.clone(),
        }
    }
}

impl fmt::Debug for ForwardHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ForwardHook")
    }
}

/// Outcome of evaluating the forward hooks for one peer.
struct PendingForward {
    peer: PeerId,
    messages: Vec<MulticastMessage>,
}

/// Network behaviour that handles the multicast protocol.
///
/// Messages flood hop-limited through the overlay: every record not seen
/// within the deduplication window is delivered to local subscribers and
/// forwarded to all other interested peers.
pub struct Multicast {
    /// Events that need to be yielded to the outside when polling.
    events: VecDeque<ToSwarm<MulticastEvent, MulticastRpc>>,

    config: Config,

    /// List of peers the network is connected to, and the topics that they're
    /// subscribed to.
    connected_peers: HashMap<PeerId, PeerState>,

    // List of topics we're subscribed to. Necessary to filter out messages
    // that we receive erroneously.
    subscribed_topics: SmallVec<[Topic; 16]>,

    // We keep track of the messages we received (in the format
    // `from ++ seqno`) so that we don't dispatch the same message twice if we
    // receive it twice on the network within the validity window.
    received: DuplicateCache<MessageId>,

    /// Per-topic forward hooks, consulted before forwarding to each peer.
    forward_hooks: HashMap<Topic, Vec<ForwardHook>>,

    /// Hook evaluations still in flight.
    pending_forwards: FuturesUnordered<BoxFuture<'static, PendingForward>>,
}

impl Multicast {
    /// Creates a `Multicast` with the given configuration.
    pub fn new(config: Config) -> Self {
        Multicast {
            events: VecDeque::new(),
            received: DuplicateCache::new(config.duplicate_cache_ttl),
            config,
            connected_peers: HashMap::new(),
            subscribed_topics: SmallVec::new(),
            forward_hooks: HashMap::new(),
            pending_forwards: FuturesUnordered::new(),
        }
    }

    /// Subscribes to a topic, announcing it to every connected peer.
    ///
    /// Returns true if the subscription worked. Returns false if we were
    /// already subscribed.
    pub fn subscribe(&mut self, topic: Topic) -> bool {
        if self.subscribed_topics.contains(&topic) {
            return false;
        }

        for peer_id in self.connected_peers.keys() {
            self.events.push_back(ToSwarm::NotifyHandler {
                peer_id: *peer_id,
                handler: NotifyHandler::Any,
                event: MulticastRpc {
                    messages: Vec::new(),
                    subscriptions: vec![MulticastSubscription {
                        action: MulticastSubscriptionAction::Subscribe,
                        topic: topic.clone(),
                    }],
                },
            });
        }

        self.subscribed_topics.push(topic);
        true
    }

    /// Unsubscribes from a topic, announcing the removal to every connected
    /// peer.
    ///
    /// Returns true if we were subscribed to this topic.
    pub fn unsubscribe(&mut self, topic: Topic) -> bool {
        let Some(pos) = self.subscribed_topics.iter().position(|t| *t == topic) else {
            return false;
        };

        self.subscribed_topics.remove(pos);

        for peer_id in self.connected_peers.keys() {
            self.events.push_back(ToSwarm::NotifyHandler {
                peer_id: *peer_id,
                handler: NotifyHandler::Any,
                event: MulticastRpc {
                    messages: Vec::new(),
                    subscriptions: vec![MulticastSubscription {
                        action: MulticastSubscriptionAction::Unsubscribe,
                        topic: topic.clone(),
                    }],
                },
            });
        }

        true
    }

    /// The topics the local node is currently subscribed to.
    pub fn subscriptions(&self) -> impl Iterator<Item = &Topic> {
        self.subscribed_topics.iter()
    }

    /// The connected peers.
    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.connected_peers.keys()
    }

    /// The connected peers that have announced the given topic.
    pub fn peers_subscribed_to<'a>(&'a self, topic: &'a Topic) -> impl Iterator<Item = &'a PeerId> {
        self.connected_peers
            .iter()
            .filter(move |(_, state)| state.is_subscribed_to(topic))
            .map(|(peer_id, _)| peer_id)
    }

    /// Registers a forward hook for a topic.
    pub fn add_forward_hook(&mut self, topic: Topic, hook: ForwardHook) {
        self.forward_hooks.entry(topic).or_default().push(hook);
    }

    /// Removes previously registered forward hooks, by identity.
    ///
    /// Returns the number of hooks removed.
    pub fn remove_forward_hooks(&mut self, topic: &Topic, hooks: &[ForwardHook]) -> usize {
        let Some(registered) = self.forward_hooks.get_mut(topic) else {
            return 0;
        };
        let before = registered.len();
        registered.retain(|existing| !hooks.iter().any(|h| existing.is(h)));
        let removed = before - registered.len();
        if registered.is_empty() {
            self.forward_hooks.remove(topic);
        }
        removed
    }

    /// Publishes a message to the network with the given forwarding credit.
    pub fn publish(&mut self, topic: impl Into<Topic>, data: impl Into<Bytes>, hops: i32) {
        self.publish_many(iter::once(topic.into()), iter::once(data.into()), hops)
    }

    /// Publishes one message per payload, each addressed to all of the given
    /// topics.
    ///
    /// Message identifiers enter the duplicate cache before anything is
    /// sent, so an echo from a peer cannot cause a second local delivery.
    pub fn publish_many(
        &mut self,
        topics: impl IntoIterator<Item = impl Into<Topic>>,
        payloads: impl IntoIterator<Item = impl Into<Bytes>>,
        hops: i32,
    ) {
        let topics = topics.into_iter().map(Into::into).collect::<Vec<Topic>>();
        if topics.is_empty() {
            return;
        }

        let mut messages = Vec::new();
        for data in payloads {
            let message = MulticastMessage {
                source: self.config.local_peer_id,
                data: data.into(),
                // If the sequence numbers were predictable, an attacker could
                // occupy the deduplication window with them and absorb our
                // legitimate messages. We therefore use a random number.
                sequence_number: rand::random::<[u8; 8]>().to_vec(),
                hops,
                topics: topics.clone(),
            };

            self.received.insert(message.id());

            if self.config.subscribe_local_messages {
                for topic in &message.topics {
                    if self.subscribed_topics.contains(topic) {
                        self.events
                            .push_back(ToSwarm::GenerateEvent(MulticastEvent::Message {
                                topic: topic.clone(),
                                message: message.clone(),
                            }));
                    }
                }
            }

            messages.push(message);
        }

        if !messages.is_empty() {
            self.forward(messages, None);
        }
    }

    /// Empties the local subscription set without announcing anything.
    ///
    /// Used when the service stops; peers learn of the reset through their
    /// connections closing. Forward hooks and the duplicate cache are kept.
    pub fn reset(&mut self) {
        self.subscribed_topics.clear();
    }

    /// Schedules one record for a peer.
    #[allow(dead_code)]
    pub(crate) fn send_rpc(&mut self, peer_id: &PeerId, rpc: MulticastRpc) -> Result<(), Error> {
        match self.connected_peers.get(peer_id) {
            Some(state) if state.is_writable() => {
                self.events.push_back(ToSwarm::NotifyHandler {
                    peer_id: *peer_id,
                    handler: NotifyHandler::Any,
                    event: rpc,
                });
                Ok(())
            }
            _ => Err(Error::NoWritableConnection),
        }
    }

    /// Sends `messages` to every other interested, writable peer.
    ///
    /// Messages whose shared topics all carry hooks are held back until the
    /// hooks have been evaluated; everything else is scheduled immediately.
    fn forward(&mut self, messages: Vec<MulticastMessage>, exclude: Option<&PeerId>) {
        for (peer_id, state) in &self.connected_peers {
            if Some(peer_id) == exclude {
                continue;
            }
            if !state.is_writable() {
                continue;
            }

            let mut immediate = Vec::new();
            let mut gated: Vec<(MulticastMessage, Vec<(Topic, Vec<ForwardHook>)>)> = Vec::new();

            for message in &messages {
                let shared = message
                    .topics
                    .iter()
                    .filter(|topic| state.is_subscribed_to(topic))
                    .collect::<Vec<_>>();
                // Peer must be subscribed to at least one of the topics.
                if shared.is_empty() {
                    continue;
                }

                // A shared topic without hooks admits the message outright;
                // otherwise every shared topic needs its hooks consulted.
                let mut hooked = Vec::new();
                let mut admitted = false;
                for topic in shared {
                    match self.forward_hooks.get(topic) {
                        Some(hooks) if !hooks.is_empty() => {
                            hooked.push((topic.clone(), hooks.clone()))
                        }
                        _ => {
                            admitted = true;
                            break;
                        }
                    }
                }

                if admitted {
                    immediate.push(message.clone());
                } else {
                    gated.push((message.clone(), hooked));
                }
            }

            if !immediate.is_empty() {
                self.events.push_back(ToSwarm::NotifyHandler {
                    peer_id: *peer_id,
                    handler: NotifyHandler::Any,
                    event: MulticastRpc {
                        messages: immediate,
                        subscriptions: Vec::new(),
                    },
                });
            }

            if !gated.is_empty() {
                self.pending_forwards
                    .push(evaluate_hooks(*peer_id, gated).boxed());
            }
        }
    }

    fn on_rpc(&mut self, propagation_source: PeerId, rpc: MulticastRpc) {
        if rpc.is_empty() {
            return;
        }

        // Update the peer's announced topics, honouring delta order.
        if !rpc.subscriptions.is_empty() {
            if let Some(state) = self.connected_peers.get_mut(&propagation_source) {
                for subscription in rpc.subscriptions {
                    state.apply(&subscription);
                    let event = match subscription.action {
                        MulticastSubscriptionAction::Subscribe => MulticastEvent::Subscribed {
                            peer_id: propagation_source,
                            topic: subscription.topic,
                        },
                        MulticastSubscriptionAction::Unsubscribe => MulticastEvent::Unsubscribed {
                            peer_id: propagation_source,
                            topic: subscription.topic,
                        },
                    };
                    self.events.push_back(ToSwarm::GenerateEvent(event));
                }
            }
        }

        let mut to_forward = Vec::new();
        for mut message in rpc.messages {
            // Fused check-then-set: a message already seen within the
            // validity window is dropped here, no matter which peer
            // delivered it.
            if !self.received.insert(message.id()) {
                continue;
            }

            // Deliver locally, once per matching subscribed topic, before
            // any forwarding.
            for topic in &message.topics {
                if self.subscribed_topics.contains(topic) {
                    self.events
                        .push_back(ToSwarm::GenerateEvent(MulticastEvent::Message {
                            topic: topic.clone(),
                            message: message.clone(),
                        }));
                }
            }

            if message.hops == 0 {
                continue;
            }
            if message.hops > 0 {
                // Peers see the decremented value; negative credit forwards
                // untouched.
                message.hops -= 1;
            }

            to_forward.push(message);
        }

        if !to_forward.is_empty() {
            self.forward(to_forward, Some(&propagation_source));
        }
    }

    fn on_connection_established(
        &mut self,
        ConnectionEstablished {
            peer_id,
            connection_id,
            other_established,
            ..
        }: ConnectionEstablished,
    ) {
        let state = self
            .connected_peers
            .entry(peer_id)
            .or_insert_with(PeerState::new);
        state.connections.push(connection_id);

        if other_established > 0 {
            // We only care about the first time a peer connects.
            return;
        }

        // We need to send our subscriptions to the newly-connected node, as
        // a single record. This is the only subscription-state exchange on
        // connect.
        if self.subscribed_topics.is_empty() {
            return;
        }
        self.events.push_back(ToSwarm::NotifyHandler {
            peer_id,
            handler: NotifyHandler::Any,
            event: MulticastRpc {
                messages: Vec::new(),
                subscriptions: self
                    .subscribed_topics
                    .iter()
                    .map(|topic| MulticastSubscription {
                        action: MulticastSubscriptionAction::Subscribe,
                        topic: topic.clone(),
                    })
                    .collect(),
            },
        });
    }

    fn on_connection_closed(
        &mut self,
        ConnectionClosed {
            peer_id,
            connection_id,
            remaining_established,
            ..
        }: ConnectionClosed,
    ) {
        if remaining_established > 0 {
            if let Some(state) = self.connected_peers.get_mut(&peer_id) {
                state.connections.retain(|c| *c != connection_id);
            }
            return;
        }

        let was_in = self.connected_peers.remove(&peer_id);
        debug_assert!(was_in.is_some());
    }
}

/// Runs the hook conjunction for every gated message.
///
/// A message passes if at least one of its shared topics admits it; a hook
/// error drops the message for this peer.
async fn evaluate_hooks(
    peer: PeerId,
    gated: Vec<(MulticastMessage, Vec<(Topic, Vec<ForwardHook>)>)>,
) -> PendingForward {
    let mut messages = Vec::new();

    'messages: for (message, topics) in gated {
        for (topic, hooks) in &topics {
            let mut admitted = true;
            for hook in hooks {
                match hook.call(&peer, &message).await {
                    Ok(true) => {}
                    Ok(false) => {
                        admitted = false;
                        break;
                    }
                    Err(error) => {
                        tracing::debug!(
                            peer=%peer,
                            %topic,
                            "Forward hook failed, dropping message for peer: {error}"
                        );
                        continue 'messages;
                    }
                }
            }
            if admitted {
                messages.push(message);
                continue 'messages;
            }
        }
    }

    PendingForward { peer, messages }
}

impl NetworkBehaviour for Multicast {
    type ConnectionHandler = Handler;
    type ToSwarm = MulticastEvent;

    fn handle_established_inbound_connection(
        &mut self,
        _: ConnectionId,
        _: PeerId,
        _: &Multiaddr,
        _: &Multiaddr,
    ) -> Result<THandler<Self>, ConnectionDenied> {
        Ok(Handler::new(MulticastProtocol::new(
            self.config.max_transmit_size,
        )))
    }

    fn handle_established_outbound_connection(
        &mut self,
        _: ConnectionId,
        _: PeerId,
        _: &Multiaddr,
        _: Endpoint,
        _: PortUse,
    ) -> Result<THandler<Self>, ConnectionDenied> {
        Ok(Handler::new(MulticastProtocol::new(
            self.config.max_transmit_size,
        )))
    }

    fn on_connection_handler_event(
        &mut self,
        propagation_source: PeerId,
        connection_id: ConnectionId,
        event: THandlerOutEvent<Self>,
    ) {
        match event {
            HandlerEvent::Rpc(rpc) => self.on_rpc(propagation_source, rpc),
            HandlerEvent::StreamError(error) => {
                // The stream to this peer is no longer usable; tear the
                // connection down and let a fresh dial re-synchronize.
                tracing::debug!(peer=%propagation_source, "Multicast stream failed: {error}");
                self.events.push_back(ToSwarm::CloseConnection {
                    peer_id: propagation_source,
                    connection: CloseConnection::One(connection_id),
                });
            }
        }
    }

    fn poll(&mut self, cx: &mut Context<'_>) -> Poll<ToSwarm<Self::ToSwarm, THandlerInEvent<Self>>> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Poll::Ready(event);
            }

            match self.pending_forwards.poll_next_unpin(cx) {
                Poll::Ready(Some(PendingForward { peer, messages })) => {
                    if messages.is_empty() {
                        continue;
                    }
                    // A hook may resolve after the peer has gone away; the
                    // result is discarded then.
                    if !self.connected_peers.contains_key(&peer) {
                        continue;
                    }
                    self.events.push_back(ToSwarm::NotifyHandler {
                        peer_id: peer,
                        handler: NotifyHandler::Any,
                        event: MulticastRpc {
                            messages,
                            subscriptions: Vec::new(),
                        },
                    });
                }
                Poll::Ready(None) | Poll::Pending => return Poll::Pending,
            }
        }
    }

    fn on_swarm_event(&mut self, event: FromSwarm) {
        match event {
            FromSwarm::ConnectionEstablished(connection_established) => {
                self.on_connection_established(connection_established)
            }
            FromSwarm::ConnectionClosed(connection_closed) => {
                self.on_connection_closed(connection_closed)
            }
            _ => {}
        }
    }
}

/// Event that can happen on the multicast behaviour.
#[derive(Debug)]
pub enum MulticastEvent {
    /// A message has been received on a topic we subscribe to.
    Message {
        /// The locally subscribed topic the message matched.
        topic: Topic,
        /// The message itself.
        message: MulticastMessage,
    },

    /// A remote subscribed to a topic.
    Subscribed {
        /// Remote that has subscribed.
        peer_id: PeerId,
        /// The topic it has subscribed to.
        topic: Topic,
    },

    /// A remote unsubscribed from a topic.
    Unsubscribed {
        /// Remote that has unsubscribed.
        peer_id: PeerId,
        /// The topic it has unsubscribed from.
        topic: Topic,
    },
}

#[cfg(test)]
mod tests {
    use libp2p_core::ConnectedPoint;

    use super::*;

    fn engine() -> Multicast {
        Multicast::new(Config::new(PeerId::random()))
    }

    fn connect(engine: &mut Multicast, peer_id: PeerId) {
        let endpoint = ConnectedPoint::Dialer {
            address: Multiaddr::empty(),
            role_override: Endpoint::Dialer,
            port_use: PortUse::Reuse,
        };
        engine.on_swarm_event(FromSwarm::ConnectionEstablished(ConnectionEstablished {
            peer_id,
            connection_id: ConnectionId::new_unchecked(0),
            endpoint: &endpoint,
            failed_addresses: &[],
            other_established: 0,
        }));
    }

    fn remote_subscribe(engine: &mut Multicast, peer_id: PeerId, topic: &str) {
        engine.on_connection_handler_event(
            peer_id,
            ConnectionId::new_unchecked(0),
            HandlerEvent::Rpc(MulticastRpc {
                messages: Vec::new(),
                subscriptions: vec![MulticastSubscription {
                    action: MulticastSubscriptionAction::Subscribe,
                    topic: Topic::new(topic),
                }],
            }),
        );
    }

    fn remote_message(topics: &[&str], hops: i32) -> MulticastMessage {
        MulticastMessage {
            source: PeerId::random(),
            data: Bytes::from_static(b"payload"),
            sequence_number: rand::random::<[u8; 8]>().to_vec(),
            hops,
            topics: topics.iter().map(|t| Topic::new(*t)).collect(),
        }
    }

    fn deliver(engine: &mut Multicast, from: PeerId, message: MulticastMessage) {
        engine.on_connection_handler_event(
            from,
            ConnectionId::new_unchecked(0),
            HandlerEvent::Rpc(MulticastRpc {
                messages: vec![message],
                subscriptions: Vec::new(),
            }),
        );
    }

    /// Polls the behaviour until it goes pending, collecting everything it
    /// yields (this also drives any in-flight hook evaluations).
    fn drain(engine: &mut Multicast) -> Vec<ToSwarm<MulticastEvent, MulticastRpc>> {
        let mut collected = Vec::new();
        futures::executor::block_on(futures::future::poll_fn(|cx| loop {
            match engine.poll(cx) {
                Poll::Ready(event) => collected.push(event),
                Poll::Pending => return Poll::Ready(()),
            }
        }));
        collected
    }

    fn deliveries(events: &[ToSwarm<MulticastEvent, MulticastRpc>]) -> Vec<(&Topic, &MulticastMessage)> {
        events
            .iter()
            .filter_map(|event| match event {
                ToSwarm::GenerateEvent(MulticastEvent::Message { topic, message }) => {
                    Some((topic, message))
                }
                _ => None,
            })
            .collect()
    }

    fn forwards(
        events: &[ToSwarm<MulticastEvent, MulticastRpc>],
    ) -> Vec<(&PeerId, &MulticastRpc)> {
        events
            .iter()
            .filter_map(|event| match event {
                ToSwarm::NotifyHandler { peer_id, event, .. } if !event.messages.is_empty() => {
                    Some((peer_id, event))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn duplicate_messages_are_delivered_once() {
        let mut engine = engine();
        engine.subscribe(Topic::new("foo"));

        let relay_a = PeerId::random();
        let relay_b = PeerId::random();
        connect(&mut engine, relay_a);
        connect(&mut engine, relay_b);

        let message = remote_message(&["foo"], 0);
        deliver(&mut engine, relay_a, message.clone());
        deliver(&mut engine, relay_b, message);

        let events = drain(&mut engine);
        assert_eq!(deliveries(&events).len(), 1);
    }

    #[test]
    fn message_matching_multiple_subscriptions_is_delivered_per_topic() {
        let mut engine = engine();
        engine.subscribe(Topic::new("foo"));
        engine.subscribe(Topic::new("bar"));

        let relay = PeerId::random();
        connect(&mut engine, relay);
        deliver(&mut engine, relay, remote_message(&["foo", "bar", "baz"], 0));

        let events = drain(&mut engine);
        let delivered = deliveries(&events);
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].0, &Topic::new("foo"));
        assert_eq!(delivered[1].0, &Topic::new("bar"));
    }

    #[test]
    fn exhausted_hop_credit_stops_forwarding() {
        let mut engine = engine();
        engine.subscribe(Topic::new("foo"));

        let relay = PeerId::random();
        let next = PeerId::random();
        connect(&mut engine, relay);
        connect(&mut engine, next);
        remote_subscribe(&mut engine, next, "foo");
        drain(&mut engine);

        deliver(&mut engine, relay, remote_message(&["foo"], 0));

        let events = drain(&mut engine);
        assert_eq!(deliveries(&events).len(), 1);
        assert!(forwards(&events).is_empty());
    }

    #[test]
    fn positive_hop_credit_is_decremented_once() {
        let mut engine = engine();

        let relay = PeerId::random();
        let next = PeerId::random();
        connect(&mut engine, relay);
        connect(&mut engine, next);
        remote_subscribe(&mut engine, next, "foo");
        drain(&mut engine);

        deliver(&mut engine, relay, remote_message(&["foo"], 2));

        let events = drain(&mut engine);
        let forwarded = forwards(&events);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].0, &next);
        assert_eq!(forwarded[0].1.messages[0].hops, 1);
    }

    #[test]
    fn negative_hop_credit_forwards_untouched() {
        let mut engine = engine();

        let relay = PeerId::random();
        let next = PeerId::random();
        connect(&mut engine, relay);
        connect(&mut engine, next);
        remote_subscribe(&mut engine, next, "foo");
        drain(&mut engine);

        deliver(&mut engine, relay, remote_message(&["foo"], -1));

        let events = drain(&mut engine);
        let forwarded = forwards(&events);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].1.messages[0].hops, -1);
    }

    #[test]
    fn messages_are_not_forwarded_to_the_source_or_disinterested_peers() {
        let mut engine = engine();

        let relay = PeerId::random();
        let interested = PeerId::random();
        let disinterested = PeerId::random();
        connect(&mut engine, relay);
        connect(&mut engine, interested);
        connect(&mut engine, disinterested);
        remote_subscribe(&mut engine, relay, "foo");
        remote_subscribe(&mut engine, interested, "foo");
        remote_subscribe(&mut engine, disinterested, "bar");
        drain(&mut engine);

        deliver(&mut engine, relay, remote_message(&["foo"], 5));

        let events = drain(&mut engine);
        let forwarded = forwards(&events);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].0, &interested);
    }

    #[test]
    fn hooks_for_a_topic_combine_by_conjunction() {
        let mut engine = engine();

        let relay = PeerId::random();
        let next = PeerId::random();
        connect(&mut engine, relay);
        connect(&mut engine, next);
        remote_subscribe(&mut engine, next, "foo");
        drain(&mut engine);

        engine.add_forward_hook(Topic::new("foo"), ForwardHook::from_fn(|_, _| true));
        engine.add_forward_hook(
            Topic::new("foo"),
            ForwardHook::from_fn(|_, message| message.data.first() != Some(&0)),
        );

        let mut accepted = remote_message(&["foo"], 1);
        accepted.data = Bytes::from_static(b"\x01rest");
        let mut rejected = remote_message(&["foo"], 1);
        rejected.data = Bytes::from_static(b"\x00rest");

        deliver(&mut engine, relay, accepted.clone());
        deliver(&mut engine, relay, rejected);

        let events = drain(&mut engine);
        let forwarded = forwards(&events);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].1.messages.len(), 1);
        assert_eq!(forwarded[0].1.messages[0].data, accepted.data);
    }

    #[test]
    fn hook_error_drops_the_message_for_that_peer() {
        let mut engine = engine();

        let relay = PeerId::random();
        let next = PeerId::random();
        connect(&mut engine, relay);
        connect(&mut engine, next);
        remote_subscribe(&mut engine, next, "foo");
        drain(&mut engine);

        engine.add_forward_hook(
            Topic::new("foo"),
            ForwardHook::new(|_, _| {
                futures::future::ready(Err::<bool, _>("validator broke".into())).boxed()
            }),
        );

        deliver(&mut engine, relay, remote_message(&["foo"], 1));

        let events = drain(&mut engine);
        assert!(forwards(&events).is_empty());
    }

    #[test]
    fn a_hookless_shared_topic_admits_the_message() {
        let mut engine = engine();

        let relay = PeerId::random();
        let next = PeerId::random();
        connect(&mut engine, relay);
        connect(&mut engine, next);
        remote_subscribe(&mut engine, next, "foo");
        remote_subscribe(&mut engine, next, "bar");
        drain(&mut engine);

        // "foo" rejects everything, but the peer also shares hookless "bar".
        engine.add_forward_hook(Topic::new("foo"), ForwardHook::from_fn(|_, _| false));

        deliver(&mut engine, relay, remote_message(&["foo", "bar"], 1));

        let events = drain(&mut engine);
        assert_eq!(forwards(&events).len(), 1);
    }

    #[test]
    fn hook_results_for_peers_that_left_are_discarded() {
        let mut engine = engine();

        let relay = PeerId::random();
        let next = PeerId::random();
        connect(&mut engine, relay);
        connect(&mut engine, next);
        remote_subscribe(&mut engine, next, "foo");
        drain(&mut engine);

        engine.add_forward_hook(Topic::new("foo"), ForwardHook::from_fn(|_, _| true));

        deliver(&mut engine, relay, remote_message(&["foo"], 1));

        // the peer disconnects while the hook evaluation is in flight
        engine.connected_peers.remove(&next);

        let events = drain(&mut engine);
        assert!(forwards(&events).is_empty());
    }

    #[test]
    fn removed_hooks_no_longer_apply() {
        let mut engine = engine();

        let reject_all = ForwardHook::from_fn(|_, _| false);
        engine.add_forward_hook(Topic::new("foo"), reject_all.clone());
        assert_eq!(
            engine.remove_forward_hooks(&Topic::new("foo"), &[reject_all]),
            1
        );

        let relay = PeerId::random();
        let next = PeerId::random();
        connect(&mut engine, relay);
        connect(&mut engine, next);
        remote_subscribe(&mut engine, next, "foo");
        drain(&mut engine);

        deliver(&mut engine, relay, remote_message(&["foo"], 1));
        assert_eq!(forwards(&drain(&mut engine)).len(), 1);
    }

    #[test]
    fn published_messages_are_not_redelivered_on_echo() {
        let mut engine = engine();
        engine.subscribe(Topic::new("foo"));

        let peer = PeerId::random();
        connect(&mut engine, peer);
        remote_subscribe(&mut engine, peer, "foo");
        drain(&mut engine);

        engine.publish(Topic::new("foo"), Bytes::from_static(b"hello"), 3);

        let events = drain(&mut engine);
        // one local delivery, one forward to the subscribed peer
        assert_eq!(deliveries(&events).len(), 1);
        let forwarded = forwards(&events);
        assert_eq!(forwarded.len(), 1);

        // the peer echoes our own message back
        let echoed = forwarded[0].1.messages[0].clone();
        deliver(&mut engine, peer, echoed);

        let events = drain(&mut engine);
        assert!(deliveries(&events).is_empty());
        assert!(forwards(&events).is_empty());
    }

    #[test]
    fn subscribing_announces_to_all_connected_peers() {
        let mut engine = engine();

        let a = PeerId::random();
        let b = PeerId::random();
        connect(&mut engine, a);
        connect(&mut engine, b);

        engine.subscribe(Topic::new("foo"));

        let announcements = drain(&mut engine)
            .into_iter()
            .filter(|event| matches!(event, ToSwarm::NotifyHandler { .. }))
            .count();
        assert_eq!(announcements, 2);
    }

    #[test]
    fn connecting_pushes_the_whole_subscription_set_as_one_record() {
        let mut engine = engine();
        engine.subscribe(Topic::new("foo"));
        engine.subscribe(Topic::new("bar"));
        drain(&mut engine);

        connect(&mut engine, PeerId::random());

        let events = drain(&mut engine);
        let rpcs = events
            .iter()
            .filter_map(|event| match event {
                ToSwarm::NotifyHandler { event, .. } => Some(event),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(rpcs.len(), 1);
        assert_eq!(rpcs[0].subscriptions.len(), 2);
        assert!(rpcs[0]
            .subscriptions
            .iter()
            .all(|s| s.action == MulticastSubscriptionAction::Subscribe));
    }

    #[test]
    fn reset_empties_the_subscription_set() {
        let mut engine = engine();
        engine.subscribe(Topic::new("foo"));

        engine.reset();

        assert_eq!(engine.subscriptions().count(), 0);
        // a later subscribe announces again as if fresh
        assert!(engine.subscribe(Topic::new("foo")));
    }

    #[test]
    fn peers_can_be_filtered_by_topic() {
        let mut engine = engine();

        let a = PeerId::random();
        let b = PeerId::random();
        connect(&mut engine, a);
        connect(&mut engine, b);
        remote_subscribe(&mut engine, a, "foo");
        drain(&mut engine);

        assert_eq!(engine.peers().count(), 2);
        let foo_topic = Topic::new("foo");
        let subscribed = engine
            .peers_subscribed_to(&foo_topic)
            .collect::<Vec<_>>();
        assert_eq!(subscribed, vec![&a]);
    }

    #[test]
    fn rpcs_to_disconnected_peers_are_refused() {
        let mut engine = engine();
        let peer = PeerId::random();

        assert!(matches!(
            engine.send_rpc(&peer, MulticastRpc::default()),
            Err(Error::NoWritableConnection)
        ));
    }
}
