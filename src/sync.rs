//! Sync engine (C5) — the core algorithm.
//!
//! ```text
//! pgn::Game
//!     ↓
//! SyncEngine::run_cycle
//!     ├── short-circuit against pgns_by_key
//!     ├── chapter match-or-create          (study::ChapterCache)
//!     ├── tree diff                        (this module)
//!     ├── version-guarded append loop       (study::client::StudyClient)
//!     └── terminal result propagation
//! ```
//!
//! The engine never holds the cache's lock across a websocket send — each
//! step takes a snapshot, releases the lock, then acts on the snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::error::RelayError;
use crate::path;
use crate::pgn::Game;
use crate::study::client::StudyClient;
use crate::study::{Chapter, ChapterCache};

const APPEND_PACING: Duration = Duration::from_millis(500);

/// Outcome of the tree-diff step (§4.5 step 3).
enum Diff {
    /// The incoming game has no moves at all; nothing to sync this cycle.
    NoMoves,
    /// The chapter already contains the incoming mainline in full (it may
    /// run on further than it, e.g. moves added by another contributor).
    /// `path` is the node id of the incoming mainline's last move, so the
    /// terminal-result step can still run against it even though nothing
    /// was appended this cycle.
    UpToDate { path: String },
    /// SAN mismatch at an interior ply; never rewritten, wait for the next poll.
    Diverged,
    /// New moves to append, starting at `start_idx` in `game.mainline`,
    /// with `path` holding the already-encoded prefix.
    NewMoves { start_idx: usize, path: String },
}

/// Drives the sync engine across polling cycles. Owns `pgns_by_key`
/// (`RelayState` in spec terms); the chapter cache and websocket client
/// are shared handles borrowed for the duration of each cycle.
pub struct SyncEngine {
    client: Arc<StudyClient>,
    cache: Arc<Mutex<ChapterCache>>,
    pgns_by_key: HashMap<String, Game>,
}

impl SyncEngine {
    pub fn new(client: Arc<StudyClient>, cache: Arc<Mutex<ChapterCache>>) -> Self {
        SyncEngine {
            client,
            cache,
            pgns_by_key: HashMap::new(),
        }
    }

    /// Run one sync cycle for a freshly-parsed game.
    pub async fn run_cycle(&mut self, game: Game) -> Result<(), RelayError> {
        let key = game.key();
        if key.is_empty() {
            debug!("dropping game with no matchable key");
            return Ok(());
        }

        // Step 1 — short-circuit.
        if self.pgns_by_key.get(&key) == Some(&game) {
            return Ok(());
        }
        self.pgns_by_key.insert(key.clone(), game.clone());

        // Step 2 — chapter match.
        let snapshot = {
            let cache = self.cache.lock().await;
            cache.get_chapters().find(|c| c.key() == key).cloned()
        };
        let chapter = match snapshot {
            Some(chapter) => chapter,
            None => {
                if game.mainline.is_empty() {
                    debug!("no chapter yet for '{}' and no moves to seed one", key);
                    return Ok(());
                }
                info!("creating chapter for '{}'", key);
                self.client.create_chapter_from_pgn(&game.to_pgn()).await?;
                return Ok(());
            }
        };

        // Step 3 — tree diff.
        match diff_tree(&chapter.tree_parts, &game) {
            Diff::NoMoves => Ok(()),
            Diff::Diverged => {
                warn!("chapter '{}' diverges from incoming mainline, waiting for next poll", key);
                Ok(())
            }
            // Already fully synced — no moves to append this cycle, but the
            // incoming mainline's last move has been reached in the chapter
            // either way, so the terminal-result step still has to run
            // (e.g. a later poll reports the `Result` tag with no new moves).
            Diff::UpToDate { path } => self.finish_cycle(&chapter, &game, &path).await,
            Diff::NewMoves { start_idx, path } => {
                match self.append_moves(&chapter, &game, start_idx, path).await? {
                    Some(final_path) => self.finish_cycle(&chapter, &game, &final_path).await,
                    // Aborted mid-append because the chapter changed under
                    // us; the incoming mainline's last move was never
                    // reached, so skip the terminal-result step this cycle.
                    None => Ok(()),
                }
            }
        }
    }

    /// Step 4 — append loop. Returns the final path once the incoming
    /// mainline's last move has been sent, or `None` if the chapter's
    /// version changed mid-append and the cycle had to bail out early.
    async fn append_moves(
        &self,
        chapter: &Chapter,
        game: &Game,
        start_idx: usize,
        mut path: String,
    ) -> Result<Option<String>, RelayError> {
        let version_at_step2 = chapter.version;
        let mut cur_idx = start_idx;
        loop {
            let current_version = {
                let cache = self.cache.lock().await;
                cache.get_chapter(&chapter.id).map(|c| c.version)
            };
            if current_version != Some(version_at_step2) {
                warn!("chapter '{}' version changed mid-append, aborting cycle", chapter.key());
                return Ok(None);
            }

            let ply = &game.mainline[cur_idx];
            let prev_board = ply.board_before;
            let mv = to_chess960(&prev_board, ply.mv);
            let uci = uci_string(&mv);
            let promotion_name = mv.promotion.map(|r| r.wire_name());

            self.client
                .add_move(
                    &chapter.id,
                    &path,
                    &prev_board.to_string(),
                    &uci,
                    promotion_name,
                    ply.clock.as_deref(),
                )
                .await?;
            path.push_str(&path::encode(&mv)?);

            if cur_idx == game.mainline.len() - 1 {
                return Ok(Some(path));
            }
            cur_idx += 1;
            tokio::time::sleep(APPEND_PACING).await;
        }
    }

    /// Re-sync the chapter, then (step 5) propagate the game's terminal
    /// result if the incoming mainline's last move has been reached and the
    /// chapter doesn't already carry that result. Called whether or not
    /// this cycle actually appended anything.
    async fn finish_cycle(
        &self,
        chapter: &Chapter,
        game: &Game,
        path: &str,
    ) -> Result<(), RelayError> {
        {
            let mut cache = self.cache.lock().await;
            cache.sync_chapter(&self.client, &chapter.id).await?;
        }

        let incoming_result = game.result();
        if incoming_result != "*" {
            let current_result = {
                let cache = self.cache.lock().await;
                cache
                    .get_chapter(&chapter.id)
                    .and_then(|c| c.tags.get("Result").cloned())
                    .unwrap_or_else(|| "*".to_string())
            };
            if current_result != incoming_result {
                self.client.set_tag(&chapter.id, "Result", incoming_result).await?;
                self.client
                    .set_move_comment(
                        &chapter.id,
                        path,
                        &format!("Game ended in: {}", incoming_result),
                    )
                    .await?;
                self.client
                    .talk(&format!("{} ended in: {}", game.title(), incoming_result))
                    .await?;
                let mut cache = self.cache.lock().await;
                cache.sync_chapter(&self.client, &chapter.id).await?;
            }
        }

        Ok(())
    }
}

/// Walk the chapter's `treeParts` against the incoming mainline, per §4.5
/// step 3. `tree_parts[0]` is the root (no move); `tree_parts[i]` for `i
/// >= 1` corresponds to `game.mainline[i - 1]`.
fn diff_tree(tree_parts: &[crate::study::TreeNode], game: &Game) -> Diff {
    if game.mainline.is_empty() {
        return Diff::NoMoves;
    }
    let l = tree_parts.len();
    if l <= 1 {
        return Diff::NewMoves { start_idx: 0, path: String::new() };
    }

    let mut path = String::new();
    let mut tree_idx = 1usize;
    let mut mainline_idx = 0usize;
    loop {
        if tree_parts[tree_idx].san != game.mainline[mainline_idx].san {
            return Diff::Diverged;
        }
        path.push_str(&tree_parts[tree_idx].id);
        if mainline_idx == game.mainline.len() - 1 {
            return Diff::UpToDate { path };
        }
        if tree_idx + 1 == l {
            return Diff::NewMoves { start_idx: mainline_idx + 1, path };
        }
        tree_idx += 1;
        mainline_idx += 1;
    }
}

/// Convert a castling king move into its Chess960 (king-takes-rook) form;
/// every other move passes through unchanged. This is the one place
/// castling semantics live — the path codec itself is agnostic to them.
fn to_chess960(board: &chess::Board, mv: chess::ChessMove) -> path::Move {
    if is_castling_move(board, mv) {
        path::Move::plain(mv.get_source(), castle_rook_square(mv))
    } else if let Some(promo) = mv.get_promotion() {
        let role = path::PromotionRole::from_chess_piece(promo)
            .expect("SAN promotion is never to a pawn");
        path::Move::promotion(mv.get_source(), mv.get_dest(), role)
    } else {
        path::Move::plain(mv.get_source(), mv.get_dest())
    }
}

fn is_castling_move(board: &chess::Board, mv: chess::ChessMove) -> bool {
    board.piece_on(mv.get_source()) == Some(chess::Piece::King)
        && (mv.get_source().get_file().to_index() as i32 - mv.get_dest().get_file().to_index() as i32)
            .abs()
            == 2
}

fn castle_rook_square(mv: chess::ChessMove) -> chess::Square {
    let rank = mv.get_source().get_rank();
    let kingside = mv.get_dest().get_file().to_index() > mv.get_source().get_file().to_index();
    let file = if kingside { chess::File::H } else { chess::File::A };
    chess::Square::make_square(rank, file)
}

fn uci_string(mv: &path::Move) -> String {
    let mut s = format!("{}{}", mv.from, mv.to);
    if let Some(role) = mv.promotion {
        s.push(match role {
            path::PromotionRole::Queen => 'q',
            path::PromotionRole::Rook => 'r',
            path::PromotionRole::Bishop => 'b',
            path::PromotionRole::Knight => 'n',
            path::PromotionRole::King => 'k',
        });
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::study::TreeNode;
    use std::str::FromStr;

    fn node(id: &str, san: &str, ply: u32) -> TreeNode {
        TreeNode { id: id.to_string(), san: san.to_string(), uci: String::new(), ply }
    }

    fn ply(san: &str) -> crate::pgn::Ply {
        crate::pgn::Ply {
            san: san.to_string(),
            mv: chess::ChessMove::new(
                chess::Square::from_str("e2").unwrap(),
                chess::Square::from_str("e4").unwrap(),
                None,
            ),
            board_before: chess::Board::default(),
            clock: None,
        }
    }

    fn game(sans: &[&str]) -> Game {
        Game {
            tags: HashMap::new(),
            mainline: sans.iter().map(|s| ply(s)).collect(),
        }
    }

    #[test]
    fn empty_tree_with_moves_yields_new_moves_from_start() {
        let g = game(&["e4", "e5"]);
        match diff_tree(&[node("", "", 0)], &g) {
            Diff::NewMoves { start_idx, path } => {
                assert_eq!(start_idx, 0);
                assert_eq!(path, "");
            }
            _ => panic!("expected NewMoves"),
        }
    }

    #[test]
    fn matching_full_mainline_is_up_to_date() {
        let g = game(&["e4", "e5"]);
        let tree = vec![node("", "", 0), node("ab", "e4", 1), node("cd", "e5", 2)];
        match diff_tree(&tree, &g) {
            Diff::UpToDate { path } => assert_eq!(path, "abcd"),
            _ => panic!("expected UpToDate"),
        }
    }

    #[test]
    fn prefix_mainline_is_up_to_date_never_truncates() {
        let g = game(&["e4"]);
        let tree = vec![node("", "", 0), node("ab", "e4", 1), node("cd", "e5", 2)];
        match diff_tree(&tree, &g) {
            Diff::UpToDate { path } => assert_eq!(path, "ab"),
            _ => panic!("expected UpToDate"),
        }
    }

    #[test]
    fn empty_incoming_mainline_yields_no_moves() {
        let g = game(&[]);
        let tree = vec![node("", "", 0), node("ab", "e4", 1)];
        assert!(matches!(diff_tree(&tree, &g), Diff::NoMoves));
    }

    #[test]
    fn extra_incoming_moves_append_from_divergence_point() {
        let g = game(&["e4", "e5", "Nf3"]);
        let tree = vec![node("", "", 0), node("ab", "e4", 1), node("cd", "e5", 2)];
        match diff_tree(&tree, &g) {
            Diff::NewMoves { start_idx, path } => {
                assert_eq!(start_idx, 2);
                assert_eq!(path, "abcd");
            }
            _ => panic!("expected NewMoves"),
        }
    }

    #[test]
    fn interior_san_mismatch_is_divergence() {
        let g = game(&["e4", "e5", "Nc3"]);
        let tree = vec![
            node("", "", 0),
            node("ab", "e4", 1),
            node("cd", "e5", 2),
            node("ef", "Nf3", 3),
        ];
        assert!(matches!(diff_tree(&tree, &g), Diff::Diverged));
    }

    #[test]
    fn castling_converts_to_king_takes_rook() {
        use std::str::FromStr as _;
        let board = chess::Board::default();
        // White king e1, rook h1 on the default board; not a legal castle
        // from the start position, but is_castling_move only checks
        // geometry (piece + 2-file jump), matching the sync engine's use
        // after the PGN parser has already confirmed legality.
        let mv = chess::ChessMove::new(
            chess::Square::from_str("e1").unwrap(),
            chess::Square::from_str("g1").unwrap(),
            None,
        );
        let converted = to_chess960(&board, mv);
        assert_eq!(converted.to, chess::Square::from_str("h1").unwrap());
    }
}
