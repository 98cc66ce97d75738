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

//! Listener-style façade over a [`Swarm`] running the [`Multicast`]
//! behaviour.
//!
//! [`new`] splits the swarm into a clonable [`Client`] and an [`EventLoop`];
//! the host spawns [`EventLoop::run`] on its executor of choice and talks to
//! the network through the client only. A single task drives the swarm, so
//! no locks are required.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use futures::{
    channel::{mpsc, oneshot},
    SinkExt, StreamExt,
};
use libp2p_identity::PeerId;
use libp2p_swarm::{Swarm, SwarmEvent};

use crate::{
    error::Error,
    layer::{ForwardHook, Multicast, MulticastEvent},
    protocol::MulticastMessage,
    topic::Topic,
};

/// Listener invoked for every message delivered on a subscribed topic.
///
/// Listeners are compared by identity: pass a clone of the `Arc` used at
/// subscription time to [`Client::unsubscribe`].
pub type MessageHandler = Arc<dyn Fn(&Topic, &MulticastMessage) + Send + Sync>;

/// Options applied when subscribing to a topic.
#[derive(Default)]
pub struct SubscribeOptions {
    /// Forward hooks installed for the topic alongside the subscription.
    pub forward_hooks: Vec<ForwardHook>,
}

/// Creates a new multicast service around an assembled swarm.
///
/// The caller is responsible for spawning [`EventLoop::run`]; operations on
/// the [`Client`] fail with [`Error::NotStarted`] until the loop is running.
pub fn new(swarm: Swarm<Multicast>) -> (Client, EventLoop) {
    let (command_sender, command_receiver) = mpsc::channel(16);
    let started = Arc::new(AtomicBool::new(false));

    (
        Client {
            sender: command_sender,
            started: started.clone(),
        },
        EventLoop {
            swarm,
            command_receiver,
            listeners: HashMap::new(),
            started,
        },
    )
}

enum Command {
    Subscribe {
        topic: Topic,
        options: SubscribeOptions,
        handler: MessageHandler,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        topic: Topic,
        handler: MessageHandler,
        reply: oneshot::Sender<()>,
    },
    Publish {
        topic: Topic,
        data: Bytes,
        hops: i32,
        reply: oneshot::Sender<()>,
    },
    Ls {
        reply: oneshot::Sender<Vec<Topic>>,
    },
    Peers {
        topic: Option<Topic>,
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    AddForwardHooks {
        topic: Topic,
        hooks: Vec<ForwardHook>,
        reply: oneshot::Sender<()>,
    },
    RemoveForwardHooks {
        topic: Topic,
        hooks: Vec<ForwardHook>,
        reply: oneshot::Sender<usize>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Clonable async handle to the multicast service.
#[derive(Clone)]
pub struct Client {
    sender: mpsc::Sender<Command>,
    started: Arc<AtomicBool>,
}

impl Client {
    /// Registers `handler` as a listener for `topic`.
    ///
    /// The first listener on a topic announces the subscription to the
    /// network; `options.forward_hooks` are installed either way.
    pub async fn subscribe(
        &mut self,
        topic: Topic,
        options: SubscribeOptions,
        handler: MessageHandler,
    ) -> Result<(), Error> {
        self.send(|reply| Command::Subscribe {
            topic,
            options,
            handler,
            reply,
        })
        .await
    }

    /// Removes a listener previously registered with [`Client::subscribe`].
    ///
    /// Removing the last listener of a topic announces the removal to the
    /// network. Unlike the other operations this returns silently when the
    /// service is not running, so tearing down listeners cannot race the
    /// shutdown.
    pub async fn unsubscribe(&mut self, topic: Topic, handler: MessageHandler) -> Result<(), Error> {
        let result = self
            .send(|reply| Command::Unsubscribe {
                topic,
                handler,
                reply,
            })
            .await;
        match result {
            Err(Error::NotStarted) => Ok(()),
            other => other,
        }
    }

    /// Publishes one message on `topic` with the given forwarding credit.
    pub async fn publish(
        &mut self,
        topic: Topic,
        data: impl Into<Bytes>,
        hops: i32,
    ) -> Result<(), Error> {
        let data = data.into();
        self.send(|reply| Command::Publish {
            topic,
            data,
            hops,
            reply,
        })
        .await
    }

    /// The topics currently subscribed to.
    pub async fn ls(&mut self) -> Result<Vec<Topic>, Error> {
        self.send(|reply| Command::Ls { reply }).await
    }

    /// The connected peers, optionally filtered to those subscribed to
    /// `topic`.
    pub async fn peers(&mut self, topic: Option<Topic>) -> Result<Vec<PeerId>, Error> {
        self.send(|reply| Command::Peers { topic, reply }).await
    }

    /// Installs forward hooks for a topic.
    pub async fn add_forward_hooks(
        &mut self,
        topic: Topic,
        hooks: Vec<ForwardHook>,
    ) -> Result<(), Error> {
        self.send(|reply| Command::AddForwardHooks {
            topic,
            hooks,
            reply,
        })
        .await
    }

    /// Removes forward hooks previously installed for a topic, by identity.
    ///
    /// Returns the number of hooks removed.
    pub async fn remove_forward_hooks(
        &mut self,
        topic: Topic,
        hooks: Vec<ForwardHook>,
    ) -> Result<usize, Error> {
        self.send(|reply| Command::RemoveForwardHooks {
            topic,
            hooks,
            reply,
        })
        .await
    }

    /// Stops the service: disconnects every peer, empties the local
    /// subscription set and terminates the event loop.
    pub async fn stop(&mut self) -> Result<(), Error> {
        self.send(|reply| Command::Stop { reply }).await
    }

    async fn send<T>(
        &mut self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, Error> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(Error::NotStarted);
        }
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| Error::NotStarted)?;
        response.await.map_err(|_| Error::NotStarted)
    }
}

/// The task driving the swarm and dispatching deliveries to listeners.
pub struct EventLoop {
    swarm: Swarm<Multicast>,
    command_receiver: mpsc::Receiver<Command>,
    listeners: HashMap<Topic, Vec<MessageHandler>>,
    started: Arc<AtomicBool>,
}

impl EventLoop {
    /// Drives the service until [`Client::stop`] is called or every client
    /// has been dropped.
    pub async fn run(mut self) {
        self.started.store(true, Ordering::SeqCst);

        loop {
            futures::select! {
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
                command = self.command_receiver.next() => match command {
                    Some(command) => {
                        if self.handle_command(command) {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.started.store(false, Ordering::SeqCst);
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<MulticastEvent>) {
        match event {
            SwarmEvent::Behaviour(MulticastEvent::Message { topic, message }) => {
                if let Some(listeners) = self.listeners.get(&topic) {
                    for listener in listeners {
                        listener(&topic, &message);
                    }
                }
            }
            SwarmEvent::Behaviour(MulticastEvent::Subscribed { peer_id, topic }) => {
                tracing::debug!(peer=%peer_id, %topic, "Peer subscribed");
            }
            SwarmEvent::Behaviour(MulticastEvent::Unsubscribed { peer_id, topic }) => {
                tracing::debug!(peer=%peer_id, %topic, "Peer unsubscribed");
            }
            event => {
                tracing::trace!(?event, "Swarm event");
            }
        }
    }

    /// Applies one command; returns `true` when the loop should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Subscribe {
                topic,
                options,
                handler,
                reply,
            } => {
                for hook in options.forward_hooks {
                    self.swarm
                        .behaviour_mut()
                        .add_forward_hook(topic.clone(), hook);
                }
                let listeners = self.listeners.entry(topic.clone()).or_default();
                let first = listeners.is_empty();
                listeners.push(handler);
                if first {
                    self.swarm.behaviour_mut().subscribe(topic);
                }
                let _ = reply.send(());
            }
            Command::Unsubscribe {
                topic,
                handler,
                reply,
            } => {
                if let Some(listeners) = self.listeners.get_mut(&topic) {
                    listeners.retain(|listener| !Arc::ptr_eq(listener, &handler));
                    if listeners.is_empty() {
                        self.listeners.remove(&topic);
                        self.swarm.behaviour_mut().unsubscribe(topic);
                    }
                }
                let _ = reply.send(());
            }
            Command::Publish {
                topic,
                data,
                hops,
                reply,
            } => {
                self.swarm.behaviour_mut().publish(topic, data, hops);
                let _ = reply.send(());
            }
            Command::Ls { reply } => {
                let _ = reply.send(self.swarm.behaviour().subscriptions().cloned().collect());
            }
            Command::Peers { topic, reply } => {
                let behaviour = self.swarm.behaviour();
                let peers = match &topic {
                    Some(topic) => behaviour.peers_subscribed_to(topic).cloned().collect(),
                    None => behaviour.peers().cloned().collect(),
                };
                let _ = reply.send(peers);
            }
            Command::AddForwardHooks {
                topic,
                hooks,
                reply,
            } => {
                for hook in hooks {
                    self.swarm
                        .behaviour_mut()
                        .add_forward_hook(topic.clone(), hook);
                }
                let _ = reply.send(());
            }
            Command::RemoveForwardHooks {
                topic,
                hooks,
                reply,
            } => {
                let removed = self
                    .swarm
                    .behaviour_mut()
                    .remove_forward_hooks(&topic, &hooks);
                let _ = reply.send(removed);
            }
            Command::Stop { reply } => {
                self.swarm.behaviour_mut().reset();
                self.listeners.clear();
                let peers = self.swarm.connected_peers().cloned().collect::<Vec<_>>();
                for peer in peers {
                    let _ = self.swarm.disconnect_peer_id(peer);
                }
                let _ = reply.send(());
                return true;
            }
        }

        false
    }
}
