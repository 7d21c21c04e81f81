//! Agent lookup by name and topic inference from the query text.

use envoy_common::{EnvoyError, Result};
use envoy_remote::{AgentDescriptor, AgentDirectory};
use serde::{Deserialize, Serialize};
use tracing::debug;

const IMPORT_KEYWORDS: &[&str] = &[
    "import",
    "imports",
    "importation",
    "importations",
    "customs",
    "customs office",
    "colombia",
    "colombian",
    "legalization",
    "process",
    "requirements",
    "documents",
    "dian",
    "certificate",
    "origin",
    "tariff",
    "foreign trade",
    "declaration",
    "duties",
];

const INVOICE_KEYWORDS: &[&str] = &[
    "invoice",
    "invoices",
    "bill",
    "bills",
    "charge",
    "payment",
    "billing",
    "account",
    "amount",
    "total",
    "vat",
    "tax",
    "withholding",
    "client",
    "customer",
    "supplier",
    "provider",
    "date",
    "number",
    "receipt",
    "value",
];

/// Suffixes that carry no identity in an agent name.
const GENERIC_SUFFIXES: &[&str] = &["agent", "bot"];

/// Subject area a specialized agent covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Imports,
    Invoices,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Imports, Topic::Invoices];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Imports => "imports",
            Topic::Invoices => "invoices",
        }
    }

    /// Substring an agent's name or description must contain to serve this topic.
    pub fn stem(&self) -> &'static str {
        match self {
            Topic::Imports => "import",
            Topic::Invoices => "invoice",
        }
    }

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Topic::Imports => IMPORT_KEYWORDS,
            Topic::Invoices => INVOICE_KEYWORDS,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "imports" | "import" => Some(Topic::Imports),
            "invoices" | "invoice" => Some(Topic::Invoices),
            _ => None,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of keyword topic inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicInference {
    Single(Topic),
    /// Tie or no keyword hits; every topic agent is consulted.
    Ambiguous,
}

/// Count keyword hits per topic and pick the strictly higher score.
pub fn infer_topic(query: &str) -> TopicInference {
    let haystack = word_haystack(query);
    let imports = score(&haystack, Topic::Imports);
    let invoices = score(&haystack, Topic::Invoices);

    let inference = match imports.cmp(&invoices) {
        std::cmp::Ordering::Greater => TopicInference::Single(Topic::Imports),
        std::cmp::Ordering::Less => TopicInference::Single(Topic::Invoices),
        std::cmp::Ordering::Equal => TopicInference::Ambiguous,
    };

    debug!(imports, invoices, ?inference, "Inferred topic");
    inference
}

/// The lower-cased query as space-separated words, padded so that
/// `" keyword "` matches whole words and phrases only.
fn word_haystack(query: &str) -> String {
    let words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}

fn score(haystack: &str, topic: Topic) -> usize {
    topic
        .keywords()
        .iter()
        .filter(|kw| haystack.contains(&format!(" {kw} ")))
        .count()
}

/// Find an agent by name.
///
/// Exact name first, then case-insensitive containment in either direction
/// (raw or after stripping separators and generic suffixes), first match in
/// directory order.
pub fn resolve<'a>(requested: &str, directory: &'a AgentDirectory) -> Result<&'a AgentDescriptor> {
    if let Some(agent) = directory.get(requested) {
        return Ok(agent);
    }

    let wanted = requested.trim().to_lowercase();
    let wanted_normalized = normalize_name(requested);

    if !wanted.is_empty() {
        let fuzzy = directory.iter().find(|agent| {
            let known = agent.name.to_lowercase();
            if known.contains(&wanted) || wanted.contains(&known) {
                return true;
            }
            let known_normalized = normalize_name(&agent.name);
            !wanted_normalized.is_empty()
                && !known_normalized.is_empty()
                && (known_normalized.contains(&wanted_normalized)
                    || wanted_normalized.contains(&known_normalized))
        });

        if let Some(agent) = fuzzy {
            debug!(requested = %requested, resolved = %agent.name, "Fuzzy agent match");
            return Ok(agent);
        }
    }

    Err(EnvoyError::AgentNotFound {
        requested: requested.to_string(),
        available: directory.names(),
    })
}

/// Lower-case, drop `_`, `-` and spaces, then strip a trailing generic suffix.
fn normalize_name(name: &str) -> String {
    let mut normalized: String = name
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect();

    for suffix in GENERIC_SUFFIXES {
        if let Some(stripped) = normalized.strip_suffix(suffix) {
            normalized = stripped.to_string();
            break;
        }
    }
    normalized
}

/// Agent serving a topic: a name match anywhere beats a description match.
pub fn agent_for_topic(topic: Topic, directory: &AgentDirectory) -> Option<&AgentDescriptor> {
    directory
        .iter()
        .find(|agent| named_for(agent, topic))
        .or_else(|| directory.iter().find(|agent| described_for(agent, topic)))
}

/// The topic an agent serves, judged by its name first, then its description.
pub fn topic_of(agent: &AgentDescriptor) -> Option<Topic> {
    Topic::ALL
        .into_iter()
        .find(|topic| named_for(agent, *topic))
        .or_else(|| Topic::ALL.into_iter().find(|topic| described_for(agent, *topic)))
}

fn named_for(agent: &AgentDescriptor, topic: Topic) -> bool {
    agent.name.to_lowercase().contains(topic.stem())
}

fn described_for(agent: &AgentDescriptor, topic: Topic) -> bool {
    agent.description.to_lowercase().contains(topic.stem())
}

/// The agent a turn is delegated to, with the topic its answer is verified against.
#[derive(Debug, Clone)]
pub struct Target<'a> {
    pub agent: &'a AgentDescriptor,
    pub topic: Option<Topic>,
}

impl Target<'_> {
    /// Topic text handed to the verification prompt.
    pub fn expected_topic(&self) -> String {
        match self.topic {
            Some(topic) => topic.to_string(),
            None => "imports or invoices".to_string(),
        }
    }
}

/// Agents to consult for an inferred topic.
///
/// A single topic with no serving agent, or an ambiguous topic, falls back to
/// every topic agent, and to every known agent when none is topic-labelled.
pub fn targets_for(inference: TopicInference, directory: &AgentDirectory) -> Vec<Target<'_>> {
    if let TopicInference::Single(topic) = inference {
        if let Some(agent) = agent_for_topic(topic, directory) {
            return vec![Target {
                agent,
                topic: Some(topic),
            }];
        }
    }

    let labelled: Vec<Target<'_>> = directory
        .iter()
        .filter_map(|agent| {
            topic_of(agent).map(|topic| Target {
                agent,
                topic: Some(topic),
            })
        })
        .collect();

    if !labelled.is_empty() {
        return labelled;
    }

    directory
        .iter()
        .map(|agent| Target { agent, topic: None })
        .collect()
}
