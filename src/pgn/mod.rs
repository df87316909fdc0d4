//! PGN parsing.
//!
//! This is the "external collaborator" the sync engine treats as a given —
//! something that turns PGN bytes into game objects with a mainline of
//! moves. A full PGN implementation (recursive variations, NAG glyph
//! tables, suffix annotations) is out of scope for the relay; only the
//! mainline of each game is ever consumed downstream, so this parser
//! drops sidelines on sight rather than modelling them.
//!
//! SAN tokens are resolved against `chess`'s legal move generator — the
//! same "propose a candidate, check it's legal" shape `uci.rs` uses for
//! parsing UCI move strings, just driven by SAN disambiguation instead of
//! a literal square pair.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::RelayError;
use crate::identity;

/// A single half-move in a game's mainline.
#[derive(Debug, Clone)]
pub struct Ply {
    /// The SAN token as it appeared in the source PGN (e.g. `"Nf3"`).
    pub san: String,
    /// The resolved move.
    pub mv: chess::ChessMove,
    /// The board position immediately before this move.
    pub board_before: chess::Board,
    /// The `[%clk h:m:s]` annotation attached to this move's comment, if any.
    pub clock: Option<String>,
}

/// A single game: its tag pairs and its mainline (sidelines are dropped).
#[derive(Debug, Clone)]
pub struct Game {
    pub tags: HashMap<String, String>,
    pub mainline: Vec<Ply>,
}

impl Game {
    /// The derived chapter-matching key (see `identity::game_key`).
    pub fn key(&self) -> String {
        identity::game_key(&self.tags)
    }

    /// The derived human title (see `identity::game_title`).
    pub fn title(&self) -> String {
        identity::game_title(&self.tags)
    }

    /// The `Result` tag, or `"*"` if absent.
    pub fn result(&self) -> &str {
        self.tags.get("Result").map(|s| s.as_str()).unwrap_or("*")
    }

    /// Re-serialise this game as PGN text, for `addChapter`.
    pub fn to_pgn(&self) -> String {
        const KNOWN_ORDER: &[&str] = &[
            "Event", "Site", "Date", "Round", "White", "Black", "Result",
        ];

        let mut out = String::new();
        let mut seen = std::collections::HashSet::new();
        for key in KNOWN_ORDER {
            if let Some(value) = self.tags.get(*key) {
                out.push_str(&format!("[{} \"{}\"]\n", key, value));
                seen.insert(*key);
            }
        }
        let mut rest: Vec<_> = self
            .tags
            .iter()
            .filter(|(k, _)| !seen.contains(k.as_str()))
            .collect();
        rest.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in rest {
            out.push_str(&format!("[{} \"{}\"]\n", key, value));
        }
        out.push('\n');

        let mut move_number = 1;
        for (i, ply) in self.mainline.iter().enumerate() {
            if i % 2 == 0 {
                out.push_str(&format!("{}. ", move_number));
                move_number += 1;
            }
            out.push_str(&ply.san);
            out.push(' ');
        }
        out.push_str(self.result());
        out
    }
}

impl PartialEq for Game {
    /// Equality used by the sync engine's short-circuit step: two games are
    /// the same if their tags and SAN/clock mainline match, regardless of
    /// incidental board/move object identity.
    fn eq(&self, other: &Self) -> bool {
        if self.tags != other.tags {
            return false;
        }
        if self.mainline.len() != other.mainline.len() {
            return false;
        }
        self.mainline
            .iter()
            .zip(other.mainline.iter())
            .all(|(a, b)| a.san == b.san && a.clock == b.clock)
    }
}

/// Strip a leading UTF-8 BOM, if present.
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
    if bytes.starts_with(BOM) {
        &bytes[BOM.len()..]
    } else {
        bytes
    }
}

/// Decode bytes as ISO-8859-1 (Latin-1): every byte maps directly to the
/// codepoint of the same value, so this never fails.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Parse zero or more games out of a block of PGN text.
pub fn parse_games(pgn_text: &str) -> Result<Vec<Game>, RelayError> {
    let mut games = Vec::new();
    let mut lines = pgn_text.lines().peekable();

    loop {
        while matches!(lines.peek(), Some(l) if l.trim().is_empty()) {
            lines.next();
        }
        if lines.peek().is_none() {
            break;
        }

        let mut tags = HashMap::new();
        while let Some(line) = lines.peek() {
            match parse_tag_line(line) {
                Some((k, v)) => {
                    tags.insert(k, v);
                    lines.next();
                }
                None => break,
            }
        }

        while matches!(lines.peek(), Some(l) if l.trim().is_empty()) {
            lines.next();
        }

        let mut movetext = String::new();
        while let Some(line) = lines.peek() {
            if line.trim().is_empty() {
                lines.next();
                break;
            }
            if parse_tag_line(line).is_some() {
                break;
            }
            movetext.push_str(line);
            movetext.push(' ');
            lines.next();
        }

        if tags.is_empty() && movetext.trim().is_empty() {
            continue;
        }

        let start_board = start_board_from_tags(&tags)?;
        let mainline = parse_movetext(&movetext, start_board)?;
        games.push(Game { tags, mainline });
    }

    Ok(games)
}

fn start_board_from_tags(tags: &HashMap<String, String>) -> Result<chess::Board, RelayError> {
    let is_set_up = tags.get("SetUp").map(|s| s == "1").unwrap_or(false);
    if is_set_up {
        if let Some(fen) = tags.get("FEN") {
            return chess::Board::from_str(fen)
                .map_err(|e| RelayError::MalformedPgn(format!("invalid FEN tag: {:?}", e)));
        }
    }
    Ok(chess::Board::default())
}

fn parse_tag_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if !line.starts_with('[') || !line.ends_with(']') {
        return None;
    }
    let inner = &line[1..line.len() - 1];
    let space_idx = inner.find(' ')?;
    let name = inner[..space_idx].to_string();
    let value = inner[space_idx + 1..].trim().trim_matches('"').to_string();
    Some((name, value))
}

fn strip_move_number(token: &str) -> &str {
    let bytes = token.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx == 0 {
        return token;
    }
    let mut end = idx;
    while end < bytes.len() && bytes[end] == b'.' {
        end += 1;
    }
    if end > idx {
        &token[end..]
    } else {
        token
    }
}

fn is_result_token(token: &str) -> bool {
    matches!(token, "1-0" | "0-1" | "1/2-1/2" | "*")
}

fn parse_movetext(movetext: &str, start_board: chess::Board) -> Result<Vec<Ply>, RelayError> {
    let mut plies = Vec::new();
    let mut board = start_board;
    let chars: Vec<char> = movetext.chars().collect();
    let n = chars.len();
    let mut i = 0;
    let mut pending_comment: Option<String> = None;

    while i < n {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '{' {
            let mut j = i + 1;
            while j < n && chars[j] != '}' {
                j += 1;
            }
            pending_comment = Some(chars[i + 1..j].iter().collect());
            i = (j + 1).min(n);
            continue;
        }
        if c == '(' {
            let mut depth = 1;
            let mut j = i + 1;
            while j < n && depth > 0 {
                match chars[j] {
                    '(' => depth += 1,
                    ')' => depth -= 1,
                    _ => {}
                }
                j += 1;
            }
            i = j;
            continue;
        }
        if c == '$' {
            let mut j = i + 1;
            while j < n && chars[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
            continue;
        }

        let mut j = i;
        while j < n && !chars[j].is_whitespace() && chars[j] != '{' && chars[j] != '(' {
            j += 1;
        }
        let raw_token: String = chars[i..j].iter().collect();
        i = j;

        let token = strip_move_number(&raw_token);
        if token.is_empty() {
            continue;
        }
        if is_result_token(token) {
            break;
        }

        let mv = resolve_san(&board, token)
            .ok_or_else(|| RelayError::MalformedPgn(format!("could not resolve move '{}'", token)))?;
        let clock = pending_comment
            .take()
            .and_then(|c| identity::clock_from_comment(&c));
        let board_before = board;
        let mut next_board = chess::Board::default();
        board.make_move(mv, &mut next_board);
        plies.push(Ply {
            san: token.to_string(),
            mv,
            board_before,
            clock,
        });
        board = next_board;
    }

    Ok(plies)
}

/// Resolve a SAN token against the board it applies to, by proposing the
/// legal move it must denote and checking for a unique match.
fn resolve_san(board: &chess::Board, raw: &str) -> Option<chess::ChessMove> {
    let token = raw.trim_end_matches(['+', '#', '!', '?']);

    if token == "O-O" || token == "0-0" {
        return castle_move(board, true);
    }
    if token == "O-O-O" || token == "0-0-0" {
        return castle_move(board, false);
    }

    let (body, promotion) = split_promotion(token);

    let mut chars: Vec<char> = body.chars().collect();
    let piece = match chars.first() {
        Some('N') => Some(chess::Piece::Knight),
        Some('B') => Some(chess::Piece::Bishop),
        Some('R') => Some(chess::Piece::Rook),
        Some('Q') => Some(chess::Piece::Queen),
        Some('K') => Some(chess::Piece::King),
        _ => None,
    };
    if piece.is_some() {
        chars.remove(0);
    }
    let rest: String = chars.into_iter().filter(|&c| c != 'x').collect();
    if rest.len() < 2 {
        return None;
    }
    let dest_str = &rest[rest.len() - 2..];
    let disambig = &rest[..rest.len() - 2];
    let dest = chess::Square::from_str(dest_str).ok()?;
    let piece_type = piece.unwrap_or(chess::Piece::Pawn);

    let disambig_file = disambig.chars().find(|c| c.is_ascii_lowercase());
    let disambig_rank = disambig.chars().find(|c| c.is_ascii_digit());

    let mut candidates = Vec::new();
    for mv in chess::MoveGen::new_legal(board) {
        if mv.get_dest() != dest {
            continue;
        }
        if board.piece_on(mv.get_source()) != Some(piece_type) {
            continue;
        }
        if let Some(f) = disambig_file {
            let file_idx = (f as u8 - b'a') as usize;
            if mv.get_source().get_file().to_index() != file_idx {
                continue;
            }
        }
        if let Some(r) = disambig_rank {
            let rank_idx = r.to_digit(10).unwrap() as usize - 1;
            if mv.get_source().get_rank().to_index() != rank_idx {
                continue;
            }
        }
        if mv.get_promotion() != promotion {
            continue;
        }
        candidates.push(mv);
    }

    if candidates.len() == 1 {
        Some(candidates[0])
    } else {
        None
    }
}

fn split_promotion(token: &str) -> (&str, Option<chess::Piece>) {
    if let Some(eq_idx) = token.find('=') {
        let body = &token[..eq_idx];
        let piece = match token[eq_idx + 1..].chars().next() {
            Some('N') => Some(chess::Piece::Knight),
            Some('B') => Some(chess::Piece::Bishop),
            Some('R') => Some(chess::Piece::Rook),
            Some('Q') => Some(chess::Piece::Queen),
            _ => None,
        };
        (body, piece)
    } else {
        (token, None)
    }
}

fn castle_move(board: &chess::Board, kingside: bool) -> Option<chess::ChessMove> {
    let (king_sq, dest_sq) = match (board.side_to_move(), kingside) {
        (chess::Color::White, true) => ("e1", "g1"),
        (chess::Color::White, false) => ("e1", "c1"),
        (chess::Color::Black, true) => ("e8", "g8"),
        (chess::Color::Black, false) => ("e8", "c8"),
    };
    let mv = chess::ChessMove::new(
        chess::Square::from_str(king_sq).ok()?,
        chess::Square::from_str(dest_sq).ok()?,
        None,
    );
    if board.legal(mv) {
        Some(mv)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_game() {
        let pgn = "[White \"Carlsen, M\"]\n[Black \"Nakamura, H\"]\n[Result \"*\"]\n\n1. e4 e5 2. Nf3 Nc6 *\n";
        let games = parse_games(pgn).unwrap();
        assert_eq!(games.len(), 1);
        let g = &games[0];
        assert_eq!(g.key(), "carlsen-m-vs-nakamura-h");
        assert_eq!(g.mainline.len(), 4);
        assert_eq!(g.mainline[0].san, "e4");
        assert_eq!(g.mainline[3].san, "Nc6");
    }

    #[test]
    fn drops_variations_keeps_mainline() {
        let pgn = "[White \"A\"]\n[Black \"B\"]\n\n1. e4 (1. d4 d5) e5 2. Nf3 *\n";
        let games = parse_games(pgn).unwrap();
        let g = &games[0];
        assert_eq!(
            g.mainline.iter().map(|p| p.san.as_str()).collect::<Vec<_>>(),
            vec!["e4", "e5", "Nf3"]
        );
    }

    #[test]
    fn extracts_clock_comment() {
        let pgn = "[White \"A\"]\n[Black \"B\"]\n\n1. e4 {[%clk 1:59:58]} e5 *\n";
        let games = parse_games(pgn).unwrap();
        let g = &games[0];
        assert_eq!(g.mainline[0].clock.as_deref(), Some("1:59:58"));
        assert_eq!(g.mainline[1].clock, None);
    }

    #[test]
    fn parses_castling_both_sides() {
        let pgn = "[White \"A\"]\n[Black \"B\"]\n\n1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 4. Ba4 Nf6 5. O-O Be7 6. d3 O-O *\n";
        let games = parse_games(pgn).unwrap();
        let g = &games[0];
        let sans: Vec<_> = g.mainline.iter().map(|p| p.san.as_str()).collect();
        assert!(sans.contains(&"O-O"));
    }

    #[test]
    fn resolves_disambiguated_knight_moves() {
        // Two knights can reach d2; SAN must disambiguate by file.
        let pgn = "[White \"A\"]\n[Black \"B\"]\n[SetUp \"1\"]\n[FEN \"4k3/8/8/8/8/8/8/N3K2N w - - 0 1\"]\n\n1. Nab3 *\n";
        let games = parse_games(pgn).unwrap();
        let g = &games[0];
        assert_eq!(g.mainline.len(), 1);
        assert_eq!(g.mainline[0].mv.get_source().to_string(), "a1");
    }

    #[test]
    fn multiple_games_in_one_feed_are_split() {
        let pgn = "[White \"A\"]\n[Black \"B\"]\n\n1. e4 *\n\n[White \"C\"]\n[Black \"D\"]\n\n1. d4 *\n";
        let games = parse_games(pgn).unwrap();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].key(), "a-vs-b");
        assert_eq!(games[1].key(), "c-vs-d");
    }

    #[test]
    fn strip_bom_removes_leading_marker() {
        let with_bom = [0xEF, 0xBB, 0xBF, b'[', b'W'];
        assert_eq!(strip_bom(&with_bom), &[b'[', b'W']);
        let without = [b'[', b'W'];
        assert_eq!(strip_bom(&without), &[b'[', b'W']);
    }
}
