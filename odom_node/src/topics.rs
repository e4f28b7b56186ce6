// odom_node/src/topics.rs

use downcast_rs::{impl_downcast, Downcast};
use std::any::TypeId;
use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use tracing::warn;

// --- Trait for Type-Erased Topics ---
/// A trait to allow storing topics of different message types in one map.
pub trait AnyTopic: Downcast + Send + Sync {}
impl_downcast!(AnyTopic);

impl<T: Clone + Send + Sync + 'static> AnyTopic for Topic<T> {}

// --- Core Topic and Reader Structs ---

/// A message stored within a Topic, wrapped with a sequence number for cursor tracking.
#[derive(Clone, Debug)]
pub struct StampedMessage<T> {
    pub id: u64,
    pub message: T,
}

/// A bounded, single-topic buffer: the oldest message is dropped when full.
#[derive(Debug)]
pub struct Topic<T: Clone + Send + Sync + 'static> {
    buffer: VecDeque<StampedMessage<T>>,
    next_id: u64,
    capacity: usize,
}

impl<T: Clone + Send + Sync + 'static> Topic<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            next_id: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn publish(&mut self, message: T) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(StampedMessage {
            id: self.next_id,
            message,
        });
        self.next_id += 1;
    }

    pub fn latest(&self) -> Option<&T> {
        self.buffer.back().map(|m| &m.message)
    }

    /// Total number of messages ever published, including dropped ones.
    pub fn published(&self) -> u64 {
        self.next_id
    }
}

/// A cursor on a named topic. Obtained from [`TopicBus::subscribe`], which
/// registers it as a subscriber.
#[derive(Debug)]
pub struct TopicReader<T: 'static> {
    pub topic_name: String,
    last_id_read: Option<u64>,
    _phantom: PhantomData<T>,
}

impl<T: Clone + Send + Sync + 'static> TopicReader<T> {
    fn new(topic_name: &str) -> Self {
        Self {
            topic_name: topic_name.to_string(),
            last_id_read: None,
            _phantom: PhantomData,
        }
    }

    /// Returns the messages published since the previous read.
    pub fn read<'a>(&mut self, topic: &'a Topic<T>) -> impl Iterator<Item = &'a StampedMessage<T>> {
        let start_index = match self.last_id_read {
            None => 0,
            Some(last_id) => topic
                .buffer
                .iter()
                .position(|msg| msg.id > last_id)
                .unwrap_or(topic.buffer.len()),
        };

        if let Some(newest_message) = topic.buffer.back() {
            self.last_id_read = Some(newest_message.id);
        }
        topic.buffer.range(start_index..)
    }

    /// Reads from the bus and clones the new messages out.
    pub fn drain(&mut self, bus: &TopicBus) -> Vec<T> {
        match bus.get_topic::<T>(&self.topic_name) {
            Some(topic) => self.read(topic).map(|m| m.message.clone()).collect(),
            None => Vec::new(),
        }
    }
}

// --- Topic Metadata ---

/// A struct holding all information about a single topic on the bus.
pub struct TopicInfo {
    pub buffer: Box<dyn AnyTopic>,
    pub topic_type: TypeId,
    pub subscribers: usize,
}

// --- The Main TopicBus ---

/// Named, typed output channels of the node.
#[derive(Default)]
pub struct TopicBus {
    topics: BTreeMap<String, TopicInfo>,
}

impl TopicBus {
    /// Creates a topic. Returns `false` if the name is already taken.
    pub fn create_topic<T: Clone + Send + Sync + 'static>(
        &mut self,
        name: &str,
        capacity: usize,
    ) -> bool {
        if self.topics.contains_key(name) {
            warn!("Topic '{}' already exists!", name);
            return false;
        }
        self.topics.insert(
            name.to_string(),
            TopicInfo {
                buffer: Box::new(Topic::<T>::new(capacity)),
                topic_type: TypeId::of::<T>(),
                subscribers: 0,
            },
        );
        true
    }

    /// Registers a subscriber. `None` if the topic does not exist or carries another type.
    pub fn subscribe<T: Clone + Send + Sync + 'static>(
        &mut self,
        topic_name: &str,
    ) -> Option<TopicReader<T>> {
        let info = self.topics.get_mut(topic_name)?;
        if info.topic_type != TypeId::of::<T>() {
            warn!("Topic '{}' carries a different message type", topic_name);
            return None;
        }
        info.subscribers += 1;
        Some(TopicReader::new(topic_name))
    }

    pub fn unsubscribe<T: 'static>(&mut self, reader: TopicReader<T>) {
        if let Some(info) = self.topics.get_mut(&reader.topic_name) {
            info.subscribers = info.subscribers.saturating_sub(1);
        }
    }

    pub fn subscriber_count(&self, topic_name: &str) -> usize {
        self.topics.get(topic_name).map_or(0, |info| info.subscribers)
    }

    pub fn publish<T: Clone + Send + Sync + 'static>(
        &mut self,
        topic_name: &str,
        message: T,
    ) -> bool {
        if let Some(info) = self.topics.get_mut(topic_name) {
            if let Some(topic) = info.buffer.downcast_mut::<Topic<T>>() {
                topic.publish(message);
                return true;
            }
        }
        false
    }

    pub fn get_topic<T: Clone + Send + Sync + 'static>(
        &self,
        topic_name: &str,
    ) -> Option<&Topic<T>> {
        self.topics
            .get(topic_name)
            .and_then(|info| info.buffer.downcast_ref::<Topic<T>>())
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }
}
