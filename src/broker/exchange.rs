use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::matching;
use super::message::Headers;
use crate::utils::error::BrokerError;

/// Routing discipline of an exchange. Fixed once declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
    Topic,
    Headers,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Topic => "topic",
            ExchangeType::Headers => "headers",
        }
    }
}

/// Header-binding mode, selected by the reserved `x-match` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    All,
    Any,
}

/// A binding's matching rule, interpreted per the owning exchange's type.
/// Constructed (and validated) at bind time so a bad spec fails fast
/// instead of misrouting at publish time.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingSpec {
    /// Exact routing-key equality.
    Direct(String),
    /// Dot-delimited pattern with `*` / `#` wildcards.
    Topic(String),
    /// Required header set plus match mode; `x-match` is already stripped.
    Headers { mode: MatchMode, required: Headers },
}

impl BindingSpec {
    /// Interprets raw bind arguments (pattern string + argument map) for
    /// the given exchange type. The `x-match` key selects the header mode
    /// and is excluded from the comparison set itself.
    fn from_args(
        kind: ExchangeType,
        pattern: &str,
        args: &Headers,
    ) -> Result<Self, BrokerError> {
        match kind {
            ExchangeType::Direct => Ok(BindingSpec::Direct(pattern.to_string())),
            ExchangeType::Topic => Ok(BindingSpec::Topic(pattern.to_string())),
            ExchangeType::Headers => {
                let mode = match args.get("x-match").map(String::as_str) {
                    None | Some("all") => MatchMode::All,
                    Some("any") => MatchMode::Any,
                    Some(other) => {
                        return Err(BrokerError::Configuration(format!(
                            "invalid x-match value '{other}', expected 'all' or 'any'"
                        )));
                    }
                };
                let required = args
                    .iter()
                    .filter(|(key, _)| key.as_str() != "x-match")
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                Ok(BindingSpec::Headers { mode, required })
            }
        }
    }
}

/// One exchange-to-queue matching rule. Multiple bindings between the
/// same pair are allowed; resolution unions them.
#[derive(Debug, Clone)]
pub struct Binding {
    pub queue: String,
    pub spec: BindingSpec,
}

#[derive(Debug)]
struct Exchange {
    kind: ExchangeType,
    bindings: Vec<Binding>,
}

/// Process-wide exchange namespace: names exchanges, records their type,
/// and indexes bindings for matching. Entries live until explicitly
/// deleted, never garbage collected, so resolution stays deterministic
/// under concurrent declare/delete.
#[derive(Debug, Default)]
pub struct ExchangeRegistry {
    exchanges: HashMap<String, Exchange>,
}

impl ExchangeRegistry {
    /// Declares an exchange. Idempotent for an identical redeclaration;
    /// redeclaring with a different type is a configuration error.
    pub fn declare(&mut self, name: &str, kind: ExchangeType) -> Result<(), BrokerError> {
        if let Some(existing) = self.exchanges.get(name) {
            if existing.kind != kind {
                return Err(BrokerError::Configuration(format!(
                    "exchange '{name}' already declared as {}, cannot redeclare as {}",
                    existing.kind.as_str(),
                    kind.as_str()
                )));
            }
            return Ok(());
        }
        self.exchanges.insert(
            name.to_string(),
            Exchange {
                kind,
                bindings: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.exchanges.contains_key(name)
    }

    /// Binds a queue to an exchange. The pattern and argument map are
    /// interpreted per the exchange type; an uninterpretable spec fails
    /// here rather than at publish time.
    pub fn bind(
        &mut self,
        exchange: &str,
        queue: &str,
        pattern: &str,
        args: &Headers,
    ) -> Result<(), BrokerError> {
        let entry = self
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;
        let spec = BindingSpec::from_args(entry.kind, pattern, args)?;
        entry.bindings.push(Binding {
            queue: queue.to_string(),
            spec,
        });
        Ok(())
    }

    /// Returns the queues a message routes to: the union of all bindings
    /// that match, deduplicated so a queue bound twice with overlapping
    /// patterns receives the message once.
    pub fn resolve(
        &self,
        exchange: &str,
        routing_key: &str,
        headers: &Headers,
    ) -> Result<Vec<String>, BrokerError> {
        let entry = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for binding in &entry.bindings {
            if matching::matches(&binding.spec, routing_key, headers)
                && seen.insert(binding.queue.as_str())
            {
                targets.push(binding.queue.clone());
            }
        }
        debug!(
            exchange,
            routing_key,
            matched = targets.len(),
            "resolved bindings"
        );
        Ok(targets)
    }

    /// Deletes an exchange and its bindings. Returns false if it did not
    /// exist.
    pub fn delete(&mut self, name: &str) -> bool {
        self.exchanges.remove(name).is_some()
    }

    /// Drops every binding pointing at a queue, used when the queue is
    /// deleted. Bindings have no lifecycle of their own.
    pub fn unbind_queue(&mut self, queue: &str) {
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|binding| binding.queue != queue);
        }
    }
}
