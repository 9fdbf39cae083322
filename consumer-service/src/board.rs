// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Board occupancy model.
//!
//! A [`Board`] is a plain 64-square value. Every transformation returns a new
//! board, so a failed move can never leave a half-applied position behind.
//! Only occupancy is tracked: there is no notion of turn, check, en passant or
//! promotion, and castling is approximated by swapping king and rook.

use std::{
    fmt::{self, Write},
    sync::LazyLock,
};

use crate::error::MoveError;

const STARTING_BOARD_TEXT: &str = "
♜♞♝♛♚♝♞♜
♟♟♟♟♟♟♟♟




♙♙♙♙♙♙♙♙
♖♘♗♕♔♗♘♖";

static STARTING_BOARD: LazyLock<Board> = LazyLock::new(|| Board::from_text(STARTING_BOARD_TEXT));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    White,
    Black,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Piece(Option<char>);

impl Piece {
    pub const EMPTY: Piece = Piece(None);
    const WHITE_KING: Piece = Piece(Some('♔'));
    const WHITE_ROOK: Piece = Piece(Some('♖'));
    const BLACK_KING: Piece = Piece(Some('♚'));
    const BLACK_ROOK: Piece = Piece(Some('♜'));

    pub fn from_glyph(glyph: char) -> Self {
        match glyph_color(glyph) {
            Some(_) => Piece(Some(glyph)),
            None => Piece::EMPTY,
        }
    }

    pub fn glyph(self) -> char {
        self.0.unwrap_or(' ')
    }

    pub fn is_empty(self) -> bool {
        self.0.is_none()
    }

    pub fn color(self) -> Option<Color> {
        self.0.and_then(glyph_color)
    }
}

fn glyph_color(glyph: char) -> Option<Color> {
    match glyph {
        '♔'..='♙' => Some(Color::White),
        '♚'..='♟' => Some(Color::Black),
        _ => None,
    }
}

/// Linear square index, `8 * rank + file` with a1 at 0 and h8 at 63.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Square(u8);

impl Square {
    /// Files outside `a..=h` and ranks outside `1..=8` are rejected.
    pub fn from_algebraic(text: &[u8]) -> Result<Self, MoveError> {
        let &[file, rank] = text else {
            return Err(MoveError::InvalidSquare);
        };
        if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(&rank) {
            return Err(MoveError::InvalidSquare);
        }
        Ok(Square(8 * (rank - b'1') + (file - b'a')))
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board([Piece; 64]);

impl Default for Board {
    fn default() -> Self {
        Board([Piece::EMPTY; 64])
    }
}

impl Board {
    pub fn starting() -> Board {
        *STARTING_BOARD
    }

    /// Parses one line per rank, rank 8 first, files a to h left to right.
    ///
    /// Surplus blank lines at either end are dropped and missing ranks are
    /// treated as empty, so indented multi-line literals parse as expected.
    pub fn from_text(text: &str) -> Board {
        let lines: Vec<&str> = text.split('\n').map(trim_line).collect();
        let lines = normalize(&lines);

        let mut squares = [Piece::EMPTY; 64];
        for rank in 0..8 {
            for (file, glyph) in lines[7 - rank].chars().take(8).enumerate() {
                squares[rank * 8 + file] = Piece::from_glyph(glyph);
            }
        }
        Board(squares)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|piece| piece.is_empty())
    }

    pub fn piece_at(&self, square: Square) -> Piece {
        self.0[square.index()]
    }

    /// Applies a `<from><to>` move such as `e2e4`, returning the new board.
    ///
    /// Input is trimmed and lowercased; anything after the first four bytes
    /// (a promotion hint, say) is ignored. Captures are not checked for
    /// legality.
    pub fn apply_move(&self, mv: &str) -> Result<Board, MoveError> {
        let mv = mv.trim().to_lowercase();
        let bytes = mv.as_bytes();
        if bytes.len() < 4 {
            return Err(MoveError::InvalidMove);
        }
        let from = Square::from_algebraic(&bytes[..2])?;
        let to = Square::from_algebraic(&bytes[2..4])?;

        let piece = self.piece_at(from);
        let target = self.piece_at(to);
        let Some(color) = piece.color() else {
            return Err(MoveError::SquareEmpty);
        };

        if target.color() == Some(color) {
            if !is_castle_pair(piece, target) {
                return Err(MoveError::SameColor);
            }
            // TODO: move king and rook to their real castling squares.
            return Ok(self.with(to, piece).with(from, target));
        }

        Ok(self.with(from, Piece::EMPTY).with(to, piece))
    }

    fn with(mut self, square: Square, piece: Piece) -> Board {
        self.0[square.index()] = piece;
        self
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        for rank in (0..8).rev() {
            for piece in &self.0[rank * 8..rank * 8 + 8] {
                f.write_char(piece.glyph())?;
            }
            if rank > 0 {
                f.write_char('\n')?;
            }
        }
        Ok(())
    }
}

fn is_castle_pair(piece: Piece, target: Piece) -> bool {
    matches!(
        (piece, target),
        (Piece::WHITE_KING, Piece::WHITE_ROOK)
            | (Piece::WHITE_ROOK, Piece::WHITE_KING)
            | (Piece::BLACK_KING, Piece::BLACK_ROOK)
            | (Piece::BLACK_ROOK, Piece::BLACK_KING)
    )
}

fn trim_line(line: &str) -> &str {
    line.trim_start_matches('\t').trim_end_matches([' ', '\r'])
}

fn normalize<'a>(mut lines: &[&'a str]) -> Vec<&'a str> {
    while lines.len() > 8 {
        let last = lines.len() - 1;
        if lines.len() > 9 && lines[0].is_empty() && lines[last].is_empty() {
            lines = &lines[1..last];
        } else if lines[0].is_empty() {
            lines = &lines[1..];
        } else if lines[last].is_empty() {
            lines = &lines[..last];
        } else {
            break;
        }
    }
    let mut lines = lines.to_vec();
    if lines.len() < 8 {
        lines.resize(8, "");
    }
    lines
}
