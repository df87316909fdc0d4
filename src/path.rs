//! Path-ID codec (C1).
//!
//! Assigns each chess move a stable, deterministic two-symbol identifier,
//! matching the scheme the remote study service uses for tree node ids:
//! <https://github.com/ornicar/scalachess/blob/master/src/main/scala/format/UciCharPair.scala>
//!
//! The codec is stateless and knows nothing about castling conversion or
//! board legality — it only turns a `from`/`to`/`promotion`/`drop` tuple
//! into two printable characters. Converting a castling move into its
//! Chess960 (king-takes-rook) form is the sync engine's job (see
//! `sync::to_chess960`), not this module's.

use crate::error::RelayError;

/// Character base: symbols start at code point 35 (`#`).
const BASE: u32 = 35;
/// Void symbol, used only where a contract defines no value; never emitted
/// for a legal move.
pub const VOID: char = '\u{21}';

const SQUARE_COUNT: u32 = 64;
const PROMOTION_COUNT: u32 = 40;

/// A promotable role, ordered to match the remote service's table:
/// queen, rook, bishop, knight, king (king is a deliberate historical
/// inclusion — standard chess cannot promote to king, but the encoding
/// stays wire-compatible with the service that reserves the slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromotionRole {
    Queen,
    Rook,
    Bishop,
    Knight,
    King,
}

impl PromotionRole {
    fn index(self) -> u32 {
        match self {
            PromotionRole::Queen => 0,
            PromotionRole::Rook => 1,
            PromotionRole::Bishop => 2,
            PromotionRole::Knight => 3,
            PromotionRole::King => 4,
        }
    }

    /// The name the wire protocol uses in `anaMove.promotion` (e.g. `"queen"`).
    pub fn wire_name(self) -> &'static str {
        match self {
            PromotionRole::Queen => "queen",
            PromotionRole::Rook => "rook",
            PromotionRole::Bishop => "bishop",
            PromotionRole::Knight => "knight",
            PromotionRole::King => "king",
        }
    }

    pub fn from_chess_piece(piece: chess::Piece) -> Option<PromotionRole> {
        match piece {
            chess::Piece::Queen => Some(PromotionRole::Queen),
            chess::Piece::Rook => Some(PromotionRole::Rook),
            chess::Piece::Bishop => Some(PromotionRole::Bishop),
            chess::Piece::Knight => Some(PromotionRole::Knight),
            chess::Piece::King => Some(PromotionRole::King),
            chess::Piece::Pawn => None,
        }
    }
}

/// A droppable role, ordered to match the remote service's table: queen,
/// rook, bishop, knight, pawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropRole {
    Queen,
    Rook,
    Bishop,
    Knight,
    Pawn,
}

impl DropRole {
    fn index(self) -> u32 {
        match self {
            DropRole::Queen => 0,
            DropRole::Rook => 1,
            DropRole::Bishop => 2,
            DropRole::Knight => 3,
            DropRole::Pawn => 4,
        }
    }
}

/// A move in the form the path codec understands. Deliberately independent
/// of `chess::ChessMove`: it needs to express drops (which the `chess`
/// crate's standard-chess board cannot) and castling is pre-converted by
/// the caller into a plain king-to-rook-square pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub from: chess::Square,
    pub to: chess::Square,
    pub promotion: Option<PromotionRole>,
    pub drop: Option<DropRole>,
}

impl Move {
    pub fn plain(from: chess::Square, to: chess::Square) -> Move {
        Move { from, to, promotion: None, drop: None }
    }

    pub fn promotion(from: chess::Square, to: chess::Square, role: PromotionRole) -> Move {
        Move { from, to, promotion: Some(role), drop: None }
    }

    pub fn drop(at: chess::Square, role: DropRole) -> Move {
        Move { from: at, to: at, promotion: None, drop: Some(role) }
    }

    /// A move with identical `from`/`to` and no promotion/drop is a null
    /// move; the codec has no representation for it.
    fn is_null(&self) -> bool {
        self.from == self.to && self.promotion.is_none() && self.drop.is_none()
    }
}

fn square_index(square: chess::Square) -> u32 {
    square.get_rank().to_index() as u32 * 8 + square.get_file().to_index() as u32
}

/// `sq_sym(s) = chr(B + 8*rank(s) + file(s))`.
pub fn square_symbol(square: chess::Square) -> char {
    char::from_u32(BASE + square_index(square)).expect("square symbol is always a valid scalar")
}

/// `promo_sym(f, r) = chr(B + 64 + r*8 + f)`.
pub fn promotion_symbol(to_file: chess::File, role: PromotionRole) -> char {
    let file_idx = to_file.to_index() as u32;
    char::from_u32(BASE + SQUARE_COUNT + role.index() * 8 + file_idx)
        .expect("promotion symbol is always a valid scalar")
}

/// `drop_sym(r) = chr(B + 64 + 40 + index_of(r))`.
pub fn drop_symbol(role: DropRole) -> char {
    char::from_u32(BASE + SQUARE_COUNT + PROMOTION_COUNT + role.index())
        .expect("drop symbol is always a valid scalar")
}

/// Encode a move into its two-symbol path id.
///
/// Fails with `UnsupportedMove` for a null move (no representation exists).
pub fn encode(mv: &Move) -> Result<String, RelayError> {
    if mv.is_null() {
        return Err(RelayError::UnsupportedMove("null move has no path id".into()));
    }

    let first = square_symbol(mv.from);
    let second = if let Some(role) = mv.drop {
        drop_symbol(role)
    } else if let Some(role) = mv.promotion {
        promotion_symbol(mv.to.get_file(), role)
    } else {
        square_symbol(mv.to)
    };

    let mut out = String::with_capacity(2);
    out.push(first);
    out.push(second);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess::Square;
    use std::str::FromStr;
    use std::collections::HashSet;

    fn sq(s: &str) -> chess::Square {
        Square::from_str(s).unwrap()
    }

    #[test]
    fn e2e4_is_slash_question_mark() {
        let mv = Move::plain(sq("e2"), sq("e4"));
        assert_eq!(encode(&mv).unwrap(), "/?");
    }

    #[test]
    fn a7a8_queen_promotion_is_sc() {
        let mv = Move::promotion(sq("a7"), sq("a8"), PromotionRole::Queen);
        assert_eq!(encode(&mv).unwrap(), "Sc");
    }

    #[test]
    fn h7h8_knight_promotion_is_z_0x82() {
        let mv = Move::promotion(sq("h7"), sq("h8"), PromotionRole::Knight);
        assert_eq!(encode(&mv).unwrap(), "Z\u{82}");
    }

    #[test]
    fn e1_takes_h1_is_quote_star() {
        let mv = Move::plain(sq("e1"), sq("h1"));
        assert_eq!(encode(&mv).unwrap(), "'*");
    }

    #[test]
    fn e1_takes_g1_is_quote_rparen() {
        let mv = Move::plain(sq("e1"), sq("g1"));
        assert_eq!(encode(&mv).unwrap(), "')");
    }

    #[test]
    fn e8_takes_g8_is_underscore_a() {
        let mv = Move::plain(sq("e8"), sq("g8"));
        assert_eq!(encode(&mv).unwrap(), "_a");
    }

    #[test]
    fn e8_takes_h8_is_underscore_b() {
        let mv = Move::plain(sq("e8"), sq("h8"));
        assert_eq!(encode(&mv).unwrap(), "_b");
    }

    #[test]
    fn null_move_is_unsupported() {
        let mv = Move::plain(sq("a1"), sq("a1"));
        assert!(matches!(encode(&mv), Err(RelayError::UnsupportedMove(_))));
    }

    #[test]
    fn every_square_pair_encodes_to_two_distinct_chars_ge_base() {
        let mut seen = HashSet::new();
        for from_idx in 0..64u8 {
            for to_idx in 0..64u8 {
                if from_idx == to_idx {
                    continue;
                }
                let from = chess::Square::new(from_idx);
                let to = chess::Square::new(to_idx);
                let mv = Move::plain(from, to);
                let encoded = encode(&mv).unwrap();
                assert_eq!(encoded.chars().count(), 2);
                for c in encoded.chars() {
                    assert!((c as u32) >= BASE);
                }
                seen.insert(encoded);
            }
        }
        // Every (from, to) pair with from != to must be distinct.
        assert_eq!(seen.len(), 64 * 63);
    }

    #[test]
    fn promotions_never_collide_with_plain_moves_for_same_origin() {
        // A promotion and a plain move sharing the same `from` square must
        // differ because the second symbol is drawn from disjoint ranges.
        let plain = Move::plain(sq("a7"), sq("a8"));
        let promo = Move::promotion(sq("a7"), sq("a8"), PromotionRole::Queen);
        assert_ne!(encode(&plain).unwrap(), encode(&promo).unwrap());
    }
}
