//! In-process mediator
//!
//! Registrations and subscriptions are kept in DashMaps keyed by path and
//! topic. Terminated actors are pruned whenever a lookup runs into them.

use dashmap::DashMap;
use rand::seq::SliceRandom;
use tracing::{debug, trace};

use crate::actor::{ActorRef, ReplyTo};
use crate::codec::Message;
use crate::error::RegistrationError;

use super::{DispatchMediator, NoRouteFound};

pub struct LocalMediator {
    /// path -> registered actors
    services: DashMap<String, Vec<ActorRef>>,
    /// topic -> subscribed actors
    topics: DashMap<String, Vec<ActorRef>>,
    /// Answer unmatched `send`s with `NoRouteFound`
    reply_on_no_match: bool,
}

impl LocalMediator {
    pub fn new(reply_on_no_match: bool) -> Self {
        Self {
            services: DashMap::new(),
            topics: DashMap::new(),
            reply_on_no_match,
        }
    }

    /// Number of live actors registered at `path`
    pub fn service_count(&self, path: &str) -> usize {
        live_targets(&self.services, path).len()
    }

    /// Number of live subscribers of `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        live_targets(&self.topics, topic).len()
    }
}

impl Default for LocalMediator {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Snapshot the live actors under `key`, dropping terminated ones
fn live_targets(map: &DashMap<String, Vec<ActorRef>>, key: &str) -> Vec<ActorRef> {
    let targets = match map.get_mut(key) {
        Some(mut entry) => {
            entry.retain(ActorRef::is_alive);
            entry.value().clone()
        }
        None => return Vec::new(),
    };
    if targets.is_empty() {
        map.remove_if(key, |_, actors| actors.is_empty());
    }
    targets
}

fn add_unique(map: &DashMap<String, Vec<ActorRef>>, key: &str, actor: ActorRef) {
    let mut entry = map.entry(key.to_string()).or_default();
    if !entry.contains(&actor) {
        entry.push(actor);
    }
}

fn pick(targets: &[ActorRef], prefer_local: bool) -> Option<&ActorRef> {
    let mut rng = rand::thread_rng();
    if prefer_local {
        let local: Vec<&ActorRef> = targets.iter().filter(|a| a.is_local()).collect();
        if let Some(actor) = local.choose(&mut rng) {
            return Some(*actor);
        }
    }
    targets.choose(&mut rng)
}

impl DispatchMediator for LocalMediator {
    fn send(&self, path: &str, message: Message, reply_to: ReplyTo, prefer_local: bool) -> usize {
        let targets = live_targets(&self.services, path);
        match pick(&targets, prefer_local) {
            Some(actor) => {
                trace!("Mediator: send to '{}' ({} candidates)", path, targets.len());
                usize::from(actor.tell(message, reply_to))
            }
            None if self.reply_on_no_match => {
                debug!("Mediator: no route to '{}', replying NoRouteFound", path);
                reply_to.tell(Message::new(NoRouteFound {
                    path: path.to_string(),
                }));
                0
            }
            None => {
                debug!("Mediator: no route to '{}', dropping {}", path, message.type_name());
                0
            }
        }
    }

    fn send_to_all(&self, path: &str, message: Message, reply_to: ReplyTo) -> usize {
        let targets = live_targets(&self.services, path);
        if targets.is_empty() {
            debug!("Mediator: no actors at '{}', dropping {}", path, message.type_name());
        }
        targets
            .iter()
            .filter(|actor| actor.tell(message.clone(), reply_to.clone()))
            .count()
    }

    fn publish(&self, topic: &str, message: Message, reply_to: ReplyTo) -> usize {
        let targets = live_targets(&self.topics, topic);
        if targets.is_empty() {
            debug!("Mediator: no subscribers for '{}', dropping {}", topic, message.type_name());
        }
        targets
            .iter()
            .filter(|actor| actor.tell(message.clone(), reply_to.clone()))
            .count()
    }

    fn register(&self, path: &str, actor: ActorRef) -> Result<(), RegistrationError> {
        if !path.starts_with('/') {
            return Err(RegistrationError::InvalidPath(path.to_string()));
        }
        if !actor.is_alive() {
            return Err(RegistrationError::ActorTerminated(actor.path().to_string()));
        }
        add_unique(&self.services, path, actor);
        debug!("Mediator: registered service at '{}'", path);
        Ok(())
    }

    fn unregister(&self, actor: &ActorRef) {
        self.services.retain(|_, actors| {
            actors.retain(|a| a != actor);
            !actors.is_empty()
        });
        debug!("Mediator: unregistered '{}'", actor.path());
    }

    fn subscribe(&self, topic: &str, actor: ActorRef) -> Result<(), RegistrationError> {
        if topic.is_empty() {
            return Err(RegistrationError::EmptyTopic);
        }
        if !actor.is_alive() {
            return Err(RegistrationError::ActorTerminated(actor.path().to_string()));
        }
        add_unique(&self.topics, topic, actor);
        debug!("Mediator: subscribed to '{}'", topic);
        Ok(())
    }

    fn unsubscribe(&self, topic: &str, actor: &ActorRef) {
        if let Some(mut entry) = self.topics.get_mut(topic) {
            entry.retain(|a| a != actor);
        }
        self.topics.remove_if(topic, |_, actors| actors.is_empty());
    }
}
