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

use uuid::Uuid;

use crate::{board::Board, error::MoveError};

#[derive(Debug, Clone)]
pub struct Game {
    id: Uuid,
    board: Board,
}

impl Game {
    pub fn new(id: Uuid, board: Board) -> Self {
        Self { id, board }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn apply_move(&mut self, mv: &str) -> Result<(), MoveError> {
        self.board = self.board.apply_move(mv)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranks(rows: [&str; 8]) -> Board {
        Board::from_text(&rows.join("\n"))
    }

    struct Case {
        name: &'static str,
        board: Board,
        mv: &'static str,
        expected: Result<Board, MoveError>,
    }

    #[test]
    fn apply_move_table() {
        let cases = [
            Case {
                name: "pawn push",
                board: Board::starting(),
                mv: "a2a4",
                expected: Ok(ranks([
                    "♜♞♝♛♚♝♞♜",
                    "♟♟♟♟♟♟♟♟",
                    "",
                    "",
                    "♙",
                    "",
                    " ♙♙♙♙♙♙♙",
                    "♖♘♗♕♔♗♘♖",
                ])),
            },
            Case {
                name: "knight move",
                board: Board::starting(),
                mv: "g1f3",
                expected: Ok(ranks([
                    "♜♞♝♛♚♝♞♜",
                    "♟♟♟♟♟♟♟♟",
                    "",
                    "",
                    "",
                    "     ♘",
                    "♙♙♙♙♙♙♙♙",
                    "♖♘♗♕♔♗ ♖",
                ])),
            },
            Case {
                name: "almost empty board",
                board: ranks(["", "", "", "", "", "     ♘", "", ""]),
                mv: "f3e5",
                expected: Ok(ranks(["", "", "", "    ♘", "", "", "", ""])),
            },
            Case {
                name: "pieces are of the same color",
                board: Board::starting(),
                mv: "a2b2",
                expected: Err(MoveError::SameColor),
            },
            Case {
                name: "square is empty",
                board: Board::starting(),
                mv: "a3a4",
                expected: Err(MoveError::SquareEmpty),
            },
            Case {
                name: "invalid square",
                board: Board::starting(),
                mv: "i8i9",
                expected: Err(MoveError::InvalidSquare),
            },
            Case {
                name: "invalid move",
                board: Board::starting(),
                mv: "",
                expected: Err(MoveError::InvalidMove),
            },
        ];

        let id = Uuid::new_v4();
        for case in cases {
            let mut game = Game::new(id, case.board);
            let result = game.apply_move(case.mv);
            match case.expected {
                Ok(expected) => {
                    assert_eq!(result, Ok(()), "{}", case.name);
                    assert_eq!(*game.board(), expected, "{}", case.name);
                    let text = game.board().to_string();
                    assert_eq!(Board::from_text(&text), expected, "{} round trip", case.name);
                }
                Err(expected) => {
                    assert_eq!(result, Err(expected), "{}", case.name);
                    assert_eq!(*game.board(), case.board, "{}", case.name);
                }
            }
            assert_eq!(game.id(), id);
        }
    }

    #[test]
    fn successive_moves_accumulate() {
        let mut game = Game::new(Uuid::new_v4(), Board::starting());
        game.apply_move("e2e4").unwrap();
        game.apply_move("e7e5").unwrap();
        game.apply_move("g1f3").unwrap();

        let expected = ranks([
            "♜♞♝♛♚♝♞♜",
            "♟♟♟♟ ♟♟♟",
            "",
            "    ♟",
            "    ♙",
            "     ♘",
            "♙♙♙♙ ♙♙♙",
            "♖♘♗♕♔♗ ♖",
        ]);
        assert_eq!(*game.board(), expected);
    }
}
