//! In-memory leader elector

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use strand_core::effects::LeaderElectorEffects;
use strand_core::{Leader, Leadership, NodeId, Result};
use tracing::debug;

#[derive(Debug, Default)]
struct Elections {
    topics: BTreeMap<String, Leadership>,
    /// Last term handed out per topic; kept after a topic empties
    terms: HashMap<String, u64>,
}

impl Elections {
    fn next_term(&mut self, topic: &str) -> u64 {
        let term = self.terms.entry(topic.to_string()).or_insert(0);
        *term += 1;
        *term
    }

    fn elect(&mut self, topic: &str, node: NodeId) -> Leader {
        Leader {
            node,
            term: self.next_term(topic),
        }
    }

    /// Drop `node` from `topic`, handing the leadership to the next candidate
    fn remove_candidate(&mut self, topic: &str, node: &NodeId) {
        let Some(leadership) = self.topics.get_mut(topic) else {
            return;
        };
        let before = leadership.candidates.len();
        leadership.candidates.retain(|candidate| candidate != node);
        if leadership.candidates.len() == before {
            return;
        }

        if leadership.is_leader(node) {
            let successor = leadership.candidates.first().cloned();
            let empty = successor.is_none();
            let leader = successor.map(|next| self.elect(topic, next));
            if empty {
                self.topics.remove(topic);
            } else if let Some(leadership) = self.topics.get_mut(topic) {
                leadership.leader = leader;
            }
        } else if leadership.candidates.is_empty() {
            self.topics.remove(topic);
        }
    }
}

/// Leader elector hosted by a [`MemoryPartition`](super::MemoryPartition)
#[derive(Debug, Default)]
pub struct MemoryLeaderElector {
    elections: Mutex<Elections>,
}

impl MemoryLeaderElector {
    /// Elector with no topics
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaderElectorEffects for MemoryLeaderElector {
    async fn run(&self, topic: &str, node: NodeId) -> Result<Leadership> {
        let mut elections = self.elections.lock();
        if !elections.topics.contains_key(topic) {
            let leader = elections.elect(topic, node.clone());
            debug!(topic, node = %node, term = leader.term, "Elected first candidate");
            elections.topics.insert(
                topic.to_string(),
                Leadership {
                    topic: topic.to_string(),
                    leader: Some(leader),
                    candidates: vec![node],
                },
            );
        } else if let Some(leadership) = elections.topics.get_mut(topic) {
            if !leadership.candidates.contains(&node) {
                leadership.candidates.push(node);
            }
        }
        Ok(elections
            .topics
            .get(topic)
            .cloned()
            .unwrap_or_else(|| Leadership::vacant(topic)))
    }

    async fn withdraw(&self, topic: &str, node: &NodeId) -> Result<()> {
        self.elections.lock().remove_candidate(topic, node);
        Ok(())
    }

    async fn anoint(&self, topic: &str, node: &NodeId) -> Result<bool> {
        let mut elections = self.elections.lock();
        let is_candidate = elections
            .topics
            .get(topic)
            .is_some_and(|leadership| leadership.candidates.contains(node));
        if !is_candidate {
            return Ok(false);
        }
        let leader = elections.elect(topic, node.clone());
        debug!(topic, node = %node, term = leader.term, "Leadership transferred");
        if let Some(leadership) = elections.topics.get_mut(topic) {
            leadership.leader = Some(leader);
        }
        Ok(true)
    }

    async fn promote(&self, topic: &str, node: &NodeId) -> Result<bool> {
        let mut elections = self.elections.lock();
        let Some(leadership) = elections.topics.get_mut(topic) else {
            return Ok(false);
        };
        let Some(position) = leadership.candidates.iter().position(|c| c == node) else {
            return Ok(false);
        };
        let promoted = leadership.candidates.remove(position);
        leadership.candidates.insert(0, promoted);
        Ok(true)
    }

    async fn evict(&self, node: &NodeId) -> Result<()> {
        let mut elections = self.elections.lock();
        let topics: Vec<String> = elections
            .topics
            .iter()
            .filter(|(_, leadership)| leadership.candidates.contains(node))
            .map(|(topic, _)| topic.clone())
            .collect();
        for topic in topics {
            elections.remove_candidate(&topic, node);
        }
        Ok(())
    }

    async fn leadership(&self, topic: &str) -> Result<Leadership> {
        Ok(self
            .elections
            .lock()
            .topics
            .get(topic)
            .cloned()
            .unwrap_or_else(|| Leadership::vacant(topic)))
    }

    async fn leaderships(&self) -> Result<BTreeMap<String, Leadership>> {
        Ok(self.elections.lock().topics.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> NodeId {
        NodeId::new(name)
    }

    #[tokio::test]
    async fn test_first_candidate_leads() {
        let elector = MemoryLeaderElector::new();
        let first = elector.run("mastership", node("a")).await.unwrap();
        let second = elector.run("mastership", node("b")).await.unwrap();

        assert!(first.is_leader(&node("a")));
        assert_eq!(second.leader, first.leader);
        assert_eq!(second.candidates, vec![node("a"), node("b")]);
        assert_eq!(second.leader.unwrap().term, 1);
    }

    #[tokio::test]
    async fn test_withdrawn_leader_is_succeeded_with_new_term() {
        let elector = MemoryLeaderElector::new();
        for name in ["a", "b", "c"] {
            elector.run("t", node(name)).await.unwrap();
        }
        elector.withdraw("t", &node("a")).await.unwrap();

        let leadership = elector.leadership("t").await.unwrap();
        assert_eq!(leadership.leader_node(), Some(&node("b")));
        assert_eq!(leadership.leader.unwrap().term, 2);
        assert_eq!(leadership.candidates, vec![node("b"), node("c")]);
    }

    #[tokio::test]
    async fn test_terms_survive_an_empty_topic() {
        let elector = MemoryLeaderElector::new();
        elector.run("t", node("a")).await.unwrap();
        elector.withdraw("t", &node("a")).await.unwrap();
        assert_eq!(elector.leadership("t").await.unwrap(), Leadership::vacant("t"));

        let leadership = elector.run("t", node("b")).await.unwrap();
        assert_eq!(leadership.leader.unwrap().term, 2);
    }

    #[tokio::test]
    async fn test_anoint_and_promote_require_candidacy() {
        let elector = MemoryLeaderElector::new();
        elector.run("t", node("a")).await.unwrap();
        elector.run("t", node("b")).await.unwrap();
        elector.run("t", node("c")).await.unwrap();

        assert!(!elector.anoint("t", &node("z")).await.unwrap());
        assert!(!elector.promote("t", &node("z")).await.unwrap());

        assert!(elector.promote("t", &node("c")).await.unwrap());
        let leadership = elector.leadership("t").await.unwrap();
        assert_eq!(leadership.candidates, vec![node("c"), node("a"), node("b")]);
        assert!(leadership.is_leader(&node("a")));

        assert!(elector.anoint("t", &node("b")).await.unwrap());
        let leadership = elector.leadership("t").await.unwrap();
        assert!(leadership.is_leader(&node("b")));
        assert_eq!(leadership.leader.unwrap().term, 2);
    }

    #[tokio::test]
    async fn test_evict_leaves_every_topic() {
        let elector = MemoryLeaderElector::new();
        elector.run("x", node("a")).await.unwrap();
        elector.run("y", node("b")).await.unwrap();
        elector.run("y", node("a")).await.unwrap();

        elector.evict(&node("a")).await.unwrap();

        let leaderships = elector.leaderships().await.unwrap();
        assert!(!leaderships.contains_key("x"));
        assert_eq!(leaderships["y"].candidates, vec![node("b")]);
        assert!(leaderships["y"].is_leader(&node("b")));
    }
}
