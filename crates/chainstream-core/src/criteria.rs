//! Log filter criteria: the address/topic/block-range predicate handed to
//! `eth_newFilter`, `eth_getLogs` and `eth_subscribe("logs")`.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::types::{BlockNumber, Log};

/// Maximum number of indexed topic positions an EVM log can carry.
pub const MAX_TOPICS: usize = 4;

/// One positional topic constraint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TopicFilter {
    /// Wildcard.
    #[default]
    Any,
    One(String),
    OneOf(BTreeSet<String>),
}

impl TopicFilter {
    /// Build a constraint from a set of values (empty → `Any`, one → `One`).
    pub fn one_of(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let set: BTreeSet<String> = values
            .into_iter()
            .map(|v| v.into().to_ascii_lowercase())
            .collect();
        match set.len() {
            0 => Self::Any,
            1 => Self::One(set.into_iter().next().unwrap_or_default()),
            _ => Self::OneOf(set),
        }
    }

    pub fn matches(&self, topic: Option<&str>) -> bool {
        match (self, topic) {
            (Self::Any, _) => true,
            (_, None) => false,
            (Self::One(want), Some(t)) => want.eq_ignore_ascii_case(t),
            (Self::OneOf(set), Some(t)) => set.iter().any(|want| want.eq_ignore_ascii_case(t)),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Any => Value::Null,
            Self::One(t) => Value::String(t.clone()),
            Self::OneOf(set) => Value::Array(set.iter().cloned().map(Value::String).collect()),
        }
    }
}

/// Criteria for a log filter.
///
/// Streams take criteria by value and keep their own copy, so a criteria
/// object never changes under a running stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterCriteria {
    pub from_block: BlockNumber,
    pub to_block: BlockNumber,
    /// Empty means any address. Stored lowercase.
    pub addresses: BTreeSet<String>,
    pub topics: Vec<TopicFilter>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Criteria matching logs emitted by a single contract.
    pub fn address(addr: impl Into<String>) -> Self {
        Self::new().with_address(addr)
    }

    pub fn with_address(mut self, addr: impl Into<String>) -> Self {
        self.addresses.insert(addr.into().to_ascii_lowercase());
        self
    }

    pub fn with_addresses(mut self, addrs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.addresses
            .extend(addrs.into_iter().map(|a| a.into().to_ascii_lowercase()));
        self
    }

    /// Append the next topic position.
    pub fn with_topic(mut self, topic: TopicFilter) -> Self {
        self.topics.push(topic);
        self
    }

    pub fn from_block(mut self, block: impl Into<BlockNumber>) -> Self {
        self.from_block = block.into();
        self
    }

    pub fn to_block(mut self, block: impl Into<BlockNumber>) -> Self {
        self.to_block = block.into();
        self
    }

    /// Same address/topic predicate over a different block range.
    pub fn with_range(&self, from: BlockNumber, to: BlockNumber) -> Self {
        Self {
            from_block: from,
            to_block: to,
            ..self.clone()
        }
    }

    /// Reject shapes the node cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.topics.len() > MAX_TOPICS {
            return Err(format!(
                "at most {MAX_TOPICS} topic positions are supported, got {}",
                self.topics.len()
            ));
        }
        Ok(())
    }

    /// Local evaluation of the address and topic predicate.
    ///
    /// The block range is not checked; it is the node's concern.
    pub fn matches(&self, log: &Log) -> bool {
        let address_ok = self.addresses.is_empty()
            || self
                .addresses
                .iter()
                .any(|a| a.eq_ignore_ascii_case(&log.address));
        address_ok
            && self
                .topics
                .iter()
                .enumerate()
                .all(|(i, f)| f.matches(log.topics.get(i).map(String::as_str)))
    }

    /// JSON object for `eth_newFilter` / `eth_getLogs`.
    pub fn to_filter_params(&self) -> Value {
        let mut obj = self.predicate_params();
        obj.insert("fromBlock".into(), Value::String(self.from_block.to_string()));
        obj.insert("toBlock".into(), Value::String(self.to_block.to_string()));
        Value::Object(obj)
    }

    /// JSON object for `eth_subscribe("logs", …)`, which takes no range.
    pub fn to_subscription_params(&self) -> Value {
        Value::Object(self.predicate_params())
    }

    fn predicate_params(&self) -> Map<String, Value> {
        let mut obj = Map::new();
        if !self.addresses.is_empty() {
            obj.insert(
                "address".into(),
                Value::Array(self.addresses.iter().cloned().map(Value::String).collect()),
            );
        }
        // Trailing wildcards carry no constraint.
        let used = self
            .topics
            .iter()
            .rposition(|t| *t != TopicFilter::Any)
            .map_or(0, |i| i + 1);
        if used > 0 {
            obj.insert(
                "topics".into(),
                Value::Array(self.topics[..used].iter().map(TopicFilter::to_json).collect()),
            );
        }
        obj
    }
}
