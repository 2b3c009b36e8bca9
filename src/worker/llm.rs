//! The LLM analyzer (spec.md §4.5.3): display-only classification for
//! content the deterministic pattern table didn't match. Its `options[]`
//! must never drive autopilot — only the caller's UI renders them.
//!
//! Grounded on `agent_setup::{claude, opencode}`'s harness-invocation shape,
//! generalized into a race across multiple model endpoints with an LRU
//! cache (the `lru` crate, pulled in from the wider pack per DESIGN.md).

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, warn};

use crate::agent::AgentHarness;
use crate::pane::PotentialHarm;

const CACHE_CAPACITY: usize = 100;
const CACHE_TTL: Duration = Duration::from_secs(5);
const RACE_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct LlmOption {
    pub action: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmAnalysis {
    pub state: String,
    pub question: Option<String>,
    pub options: Vec<LlmOption>,
    pub potential_harm: Option<PotentialHarm>,
    pub summary: Option<String>,
}

struct CacheEntry {
    analysis: LlmAnalysis,
    fetched_at: Instant,
}

pub fn content_hash(content: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// Races one call per configured endpoint, caches by content hash, and
/// deduplicates concurrent requests keyed by `(pane_id, content_hash)`.
pub struct LlmAnalyzer {
    endpoints: Vec<Arc<dyn AgentHarness>>,
    cache: Mutex<LruCache<u64, CacheEntry>>,
    inflight: Mutex<HashSet<(String, u64)>>,
}

impl LlmAnalyzer {
    pub fn new(endpoints: Vec<Arc<dyn AgentHarness>>) -> Self {
        Self {
            endpoints,
            cache: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero capacity"),
            )),
            inflight: Mutex::new(HashSet::new()),
        }
    }

    pub fn cached(&self, hash: u64) -> Option<LlmAnalysis> {
        let mut cache = self.cache.lock().expect("llm cache lock poisoned");
        let entry = cache.get(&hash)?;
        if entry.fetched_at.elapsed() < CACHE_TTL {
            Some(entry.analysis.clone())
        } else {
            None
        }
    }

    /// Returns `None` if another task already has this `(pane_id, hash)`
    /// in flight, matching spec.md's concurrent-request dedup rule.
    fn try_claim(&self, pane_id: &str, hash: u64) -> bool {
        let mut inflight = self.inflight.lock().expect("llm inflight lock poisoned");
        inflight.insert((pane_id.to_string(), hash))
    }

    fn release(&self, pane_id: &str, hash: u64) {
        let mut inflight = self.inflight.lock().expect("llm inflight lock poisoned");
        inflight.remove(&(pane_id.to_string(), hash));
    }

    /// Analyze `content` for `pane_id`, consulting the cache first. If no
    /// endpoint is configured, or every race leg fails within the overall
    /// deadline, returns `None` (caller keeps the previous classification).
    pub async fn analyze(&self, pane_id: &str, content: &str) -> Option<LlmAnalysis> {
        let hash = content_hash(content);

        if let Some(hit) = self.cached(hash) {
            return Some(hit);
        }

        if !self.try_claim(pane_id, hash) {
            debug!(pane_id, "llm:request already in flight, skipping duplicate");
            return None;
        }

        let result = self.race(content).await;
        self.release(pane_id, hash);

        if let Some(analysis) = &result {
            let mut cache = self.cache.lock().expect("llm cache lock poisoned");
            cache.put(
                hash,
                CacheEntry {
                    analysis: analysis.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
        result
    }

    async fn race(&self, content: &str) -> Option<LlmAnalysis> {
        if self.endpoints.is_empty() {
            return None;
        }

        let prompt = build_prompt(content);
        let mut tasks = tokio::task::JoinSet::new();
        for endpoint in &self.endpoints {
            let endpoint = Arc::clone(endpoint);
            let prompt = prompt.clone();
            tasks.spawn_blocking(move || endpoint.run(&prompt, RACE_DEADLINE));
        }

        let deadline = tokio::time::Instant::now() + RACE_DEADLINE;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                tasks.abort_all();
                return None;
            }
            match tokio::time::timeout(remaining, tasks.join_next()).await {
                Ok(Some(Ok(Ok(Some(text))))) => {
                    if let Some(parsed) = parse_response(&text) {
                        tasks.abort_all();
                        return Some(parsed);
                    }
                }
                Ok(Some(_)) => continue,
                Ok(None) => return None,
                Err(_elapsed) => {
                    tasks.abort_all();
                    return None;
                }
            }
        }
    }
}

fn build_prompt(content: &str) -> String {
    format!(
        "Classify this terminal pane's state. Reply as JSON with keys \
         state, question, options (array of {{action, keys}}), \
         potentialHarm ({{hasRisk, description}}), summary.\n\n{content}"
    )
}

/// Best-effort JSON parse of the harness's reply. Harnesses are prompted
/// for JSON but may wrap it in prose; this looks for the first top-level
/// object.
fn parse_response(text: &str) -> Option<LlmAnalysis> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let json = &text[start..=end];
    let value: serde_json::Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "llm:response was not valid JSON, discarding");
            return None;
        }
    };

    let state = value.get("state")?.as_str()?.to_string();
    let question = value.get("question").and_then(|v| v.as_str()).map(|s| s.to_string());
    let options = value
        .get("options")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|o| {
                    let action = o.get("action")?.as_str()?.to_string();
                    let keys = o
                        .get("keys")?
                        .as_array()?
                        .iter()
                        .filter_map(|k| k.as_str().map(|s| s.to_string()))
                        .collect();
                    Some(LlmOption { action, keys })
                })
                .collect()
        })
        .unwrap_or_default();
    let potential_harm = value.get("potentialHarm").map(|h| PotentialHarm {
        has_risk: h.get("hasRisk").and_then(|v| v.as_bool()).unwrap_or(false),
        description: h.get("description").and_then(|v| v.as_str()).map(|s| s.to_string()),
    });
    let summary = value.get("summary").and_then(|v| v.as_str()).map(|s| s.to_string());

    Some(LlmAnalysis {
        state,
        question,
        options,
        potential_harm,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }

    #[test]
    fn parse_response_extracts_embedded_json() {
        let text = "Sure, here you go:\n{\"state\":\"option_dialog\",\"question\":\"Proceed?\",\
                    \"options\":[{\"action\":\"Yes\",\"keys\":[\"y\"]}],\
                    \"potentialHarm\":{\"hasRisk\":false},\"summary\":null}\nThanks!";
        let parsed = parse_response(text).unwrap();
        assert_eq!(parsed.state, "option_dialog");
        assert_eq!(parsed.options.len(), 1);
        assert!(!parsed.potential_harm.unwrap().has_risk);
    }

    #[test]
    fn parse_response_rejects_non_json() {
        assert!(parse_response("no braces here").is_none());
    }

    #[test]
    fn inflight_claim_prevents_duplicate() {
        let analyzer = LlmAnalyzer::new(Vec::new());
        assert!(analyzer.try_claim("pane-1", 42));
        assert!(!analyzer.try_claim("pane-1", 42));
        analyzer.release("pane-1", 42);
        assert!(analyzer.try_claim("pane-1", 42));
    }
}
