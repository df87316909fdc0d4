//! Relays a live PGN feed into a remote study as an append-only move tree.
//!
//! ```text
//! poll::PollDriver          (C6)
//!     ↓ PGN bytes
//! pgn::parse_games          (external collaborator, concretely implemented)
//!     ↓ Game
//! sync::SyncEngine          (C5)
//!     ↕                ↕
//! study::ChapterCache  study::client::StudyClient   (C3 / C4)
//!     ↑
//! path::encode               (C1)
//! identity::game_key/title   (C2)
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod path;
pub mod pgn;
pub mod poll;
pub mod study;
pub mod sync;
