//! Chapter cache and study data model (C3).
//!
//! ```text
//! StudyClient::fetch_study / fetch_chapter
//!     ↓ JSON
//! ChapterCache::sync_full / sync_chapter
//!     ↓ owns
//! Chapter { tags, treeParts, version }
//!     ↑ read-only snapshot
//! sync engine (sync.rs)
//! ```
//!
//! The cache owns every `Chapter` it holds; the sync engine only ever
//! borrows a snapshot and checks the owning cache's version before it
//! sends anything (spec's "no reference held across a yield" rule).

pub mod client;

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::RelayError;
use crate::identity;
use client::StudyClient;

/// A single tree node of a chapter's mainline, `treeParts[0]` being the root.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeNode {
    pub id: String,
    #[serde(default)]
    pub san: String,
    #[serde(default)]
    pub uci: String,
    pub ply: u32,
}

/// One chapter: a study's representation of a single game as a move tree.
#[derive(Debug, Clone)]
pub struct Chapter {
    pub id: String,
    pub tags: HashMap<String, String>,
    pub tree_parts: Vec<TreeNode>,
    /// The relay's private optimistic-concurrency token. Strictly
    /// non-decreasing; bumped every time this chapter is re-fetched.
    pub version: u64,
}

impl Chapter {
    pub fn key(&self) -> String {
        identity::game_key(&self.tags)
    }
}

#[derive(Debug, Deserialize)]
struct StudyResponse {
    study: StudyBody,
}

#[derive(Debug, Deserialize)]
struct StudyBody {
    chapters: Vec<ChapterSummary>,
    #[serde(default)]
    members: HashMap<String, MemberBody>,
}

#[derive(Debug, Deserialize)]
struct ChapterSummary {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MemberBody {
    role: String,
}

#[derive(Debug, Deserialize)]
struct ChapterResponse {
    study: ChapterStudyBody,
    analysis: ChapterAnalysisBody,
}

#[derive(Debug, Deserialize)]
struct ChapterStudyBody {
    chapter: ChapterBody,
}

#[derive(Debug, Deserialize)]
struct ChapterBody {
    tags: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct ChapterAnalysisBody {
    #[serde(rename = "treeParts")]
    tree_parts: Vec<TreeNode>,
}

/// In-memory store of chapters *and* membership, fetched together from the
/// same `/study/<id>` response body. Chapters are versioned so the sync
/// engine can detect a re-fetch mid-append; membership is a flat snapshot
/// refreshed every time a full sync runs (connect time, a `reload` with no
/// chapter id, or a contributor's `"sync "` chat command), matching
/// `Study.study_data`'s single-source-of-truth role in the original client.
pub struct ChapterCache {
    study_id: String,
    chapters: HashMap<String, Chapter>,
    members: HashMap<String, String>,
}

impl ChapterCache {
    pub fn new(study_id: impl Into<String>) -> Self {
        ChapterCache {
            study_id: study_id.into(),
            chapters: HashMap::new(),
            members: HashMap::new(),
        }
    }

    /// GET the study; refresh the membership snapshot and, for each listed
    /// chapter, refresh it. Used at connect time and whenever a full sync
    /// is forced (a `reload` with no chapter id, or a contributor's
    /// `"sync "` chat command) — both cases must also refresh membership,
    /// since it comes from this same response body.
    pub async fn sync_full(&mut self, client: &StudyClient) -> Result<(), RelayError> {
        let body = client.fetch_study_json(&self.study_id).await?;
        let parsed: StudyResponse = serde_json::from_str(&body)?;
        debug!(
            "full sync: {} chapters listed, {} members",
            parsed.study.chapters.len(),
            parsed.study.members.len()
        );
        self.members = parsed
            .study
            .members
            .into_iter()
            .map(|(user, m)| (user, m.role))
            .collect();
        for summary in parsed.study.chapters {
            self.sync_chapter_inner(client, &summary.id).await?;
        }
        Ok(())
    }

    /// True if `user` appears in the membership snapshot with write (`"w"`)
    /// role.
    pub fn is_contributor(&self, user: &str) -> bool {
        self.members.get(user).map(|role| role == "w").unwrap_or(false)
    }

    /// GET a single chapter resource (cache-busted), flatten its tags,
    /// bump its version, and store it.
    pub async fn sync_chapter(
        &mut self,
        client: &StudyClient,
        chapter_id: &str,
    ) -> Result<(), RelayError> {
        self.sync_chapter_inner(client, chapter_id).await
    }

    async fn sync_chapter_inner(
        &mut self,
        client: &StudyClient,
        chapter_id: &str,
    ) -> Result<(), RelayError> {
        let body = client.fetch_chapter_json(&self.study_id, chapter_id).await?;
        let parsed: ChapterResponse = serde_json::from_str(&body)?;
        let tags = parsed
            .study
            .chapter
            .tags
            .into_iter()
            .collect::<HashMap<_, _>>();
        let next_version = self
            .chapters
            .get(chapter_id)
            .map(|c| c.version + 1)
            .unwrap_or(1);
        debug!("synced chapter {} to version {}", chapter_id, next_version);
        self.chapters.insert(
            chapter_id.to_string(),
            Chapter {
                id: chapter_id.to_string(),
                tags,
                tree_parts: parsed.analysis.tree_parts,
                version: next_version,
            },
        );
        Ok(())
    }

    pub fn get_chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.chapters.values()
    }

    pub fn get_chapter(&self, id: &str) -> Option<&Chapter> {
        self.chapters.get(id)
    }
}

/// Chapter cache for one study, shared between the websocket reader task
/// and the sync engine. Membership lives inside the cache (see
/// `ChapterCache::is_contributor`) so that every forced full sync refreshes
/// it too, rather than Study holding a second copy that only the process
/// startup path ever populates.
pub struct Study {
    pub cache: Arc<Mutex<ChapterCache>>,
}

impl Study {
    pub fn new(study_id: impl Into<String>) -> Self {
        Study {
            cache: Arc::new(Mutex::new(ChapterCache::new(study_id))),
        }
    }

    /// True if `user` holds write membership, per the cache's current
    /// membership snapshot.
    pub async fn is_contributor(&self, user: &str) -> bool {
        self.cache.lock().await.is_contributor(user)
    }

    /// Fails with `NotAContributor` unless `user` holds write membership.
    pub async fn ensure_contributor(&self, user: &str) -> Result<(), RelayError> {
        if self.is_contributor(user).await {
            Ok(())
        } else {
            Err(RelayError::NotAContributor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(id: &str, tags: &[(&str, &str)], version: u64) -> Chapter {
        Chapter {
            id: id.to_string(),
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            tree_parts: vec![],
            version,
        }
    }

    #[test]
    fn chapter_key_uses_identity_helper() {
        let c = chapter("c1", &[("White", "Carlsen, M"), ("Black", "Nakamura, H")], 1);
        assert_eq!(c.key(), "carlsen-m-vs-nakamura-h");
    }

    #[test]
    fn is_contributor_requires_write_role() {
        let mut cache = ChapterCache::new("abcd1234");
        cache.members.insert("alice".to_string(), "w".to_string());
        cache.members.insert("bob".to_string(), "r".to_string());
        assert!(cache.is_contributor("alice"));
        assert!(!cache.is_contributor("bob"));
        assert!(!cache.is_contributor("carol"));
    }

    #[test]
    fn cache_get_chapter_reads_stored_value() {
        let mut cache = ChapterCache::new("abcd1234");
        cache
            .chapters
            .insert("c1".to_string(), chapter("c1", &[("White", "A"), ("Black", "B")], 3));
        assert_eq!(cache.get_chapter("c1").unwrap().version, 3);
        assert!(cache.get_chapter("missing").is_none());
    }
}
