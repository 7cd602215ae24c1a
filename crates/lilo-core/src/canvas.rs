//! The word pieces currently on a room's canvas.

use indexmap::IndexMap;

use crate::types::{Operation, OperationPayload, WordPiece};

/// Word pieces keyed by id, in the order they were first added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Canvas {
    pieces: IndexMap<String, WordPiece>,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a canvas by applying `operations` in order to an empty one.
    pub fn replay<'a>(operations: impl IntoIterator<Item = &'a Operation>) -> Self {
        let mut canvas = Self::new();
        for op in operations {
            canvas.apply(&op.payload);
        }
        canvas
    }

    /// Apply one payload. Add and update both replace the whole piece; a
    /// repeated id keeps its original position in the ordering.
    pub fn apply(&mut self, payload: &OperationPayload) {
        match payload {
            OperationPayload::Add(piece) | OperationPayload::Update(piece) => {
                self.pieces.insert(piece.id.clone(), piece.clone());
            }
            OperationPayload::Delete { id } => {
                self.pieces.shift_remove(id);
            }
            OperationPayload::Clear => self.pieces.clear(),
            OperationPayload::CursorMove(_) => {}
        }
    }

    pub fn get(&self, id: &str) -> Option<&WordPiece> {
        self.pieces.get(id)
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn pieces(&self) -> Vec<WordPiece> {
        self.pieces.values().cloned().collect()
    }
}
