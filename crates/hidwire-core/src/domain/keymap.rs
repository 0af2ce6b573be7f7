//! Keymap buffer layout.
//!
//! A keymap is a flat array of big-endian `u16` keycodes indexed
//! `[layer][row][col]`: layer-major, then row-major.  Cell `(l, r, c)` lives
//! at byte offset `2 * ((l * rows + r) * cols + c)`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes per keymap cell.
pub const CELL_SIZE: usize = 2;

/// Address of one key in the keymap matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPosition {
    pub layer: u8,
    pub row: u8,
    pub col: u8,
}

impl KeyPosition {
    pub fn new(layer: u8, row: u8, col: u8) -> Self {
        Self { layer, row, col }
    }
}

impl fmt::Display for KeyPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}/R{}/C{}", self.layer, self.row, self.col)
    }
}

/// Errors raised when addressing a keymap.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeymapError {
    #[error("key {position} is outside a {layers}x{rows}x{cols} keymap")]
    OutOfRange {
        position: KeyPosition,
        layers: u8,
        rows: u8,
        cols: u8,
    },
}

/// Dimensions of a keymap matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeymapGeometry {
    pub layers: u8,
    pub rows: u8,
    pub cols: u8,
}

impl KeymapGeometry {
    pub fn new(layers: u8, rows: u8, cols: u8) -> Self {
        Self { layers, rows, cols }
    }

    /// Number of cells across all layers.
    pub fn cell_count(&self) -> usize {
        self.layers as usize * self.cells_per_layer()
    }

    /// Number of cells in one layer.
    pub fn cells_per_layer(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Size in bytes of the whole keymap buffer.
    pub fn buffer_len(&self) -> usize {
        self.cell_count() * CELL_SIZE
    }

    /// Returns `true` if `pos` addresses a cell of this geometry.
    pub fn contains(&self, pos: KeyPosition) -> bool {
        pos.layer < self.layers && pos.row < self.rows && pos.col < self.cols
    }

    /// Returns the cell index of `pos`, or `None` when out of range.
    pub fn cell_index(&self, pos: KeyPosition) -> Option<usize> {
        self.contains(pos).then(|| {
            (pos.layer as usize * self.rows as usize + pos.row as usize) * self.cols as usize
                + pos.col as usize
        })
    }

    /// Returns the byte offset of `pos` in the keymap buffer.
    pub fn cell_offset(&self, pos: KeyPosition) -> Option<usize> {
        self.cell_index(pos).map(|i| i * CELL_SIZE)
    }

    fn out_of_range(&self, position: KeyPosition) -> KeymapError {
        KeymapError::OutOfRange {
            position,
            layers: self.layers,
            rows: self.rows,
            cols: self.cols,
        }
    }
}

/// A decoded keymap: one `u16` keycode per cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keymap {
    geometry: KeymapGeometry,
    codes: Vec<u16>,
}

impl Keymap {
    /// Creates a keymap with every cell set to 0 (`KC_NO`).
    pub fn empty(geometry: KeymapGeometry) -> Self {
        Self {
            geometry,
            codes: vec![0; geometry.cell_count()],
        }
    }

    /// Decodes a big-endian keymap buffer.
    ///
    /// Cells missing from a short buffer are 0; a trailing odd byte and any
    /// bytes past the geometry are ignored.
    pub fn from_buffer(geometry: KeymapGeometry, buffer: &[u8]) -> Self {
        let mut codes: Vec<u16> = buffer
            .chunks_exact(CELL_SIZE)
            .take(geometry.cell_count())
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        codes.resize(geometry.cell_count(), 0);
        Self { geometry, codes }
    }

    /// Encodes the keymap as a big-endian buffer.
    pub fn to_buffer(&self) -> Vec<u8> {
        self.codes.iter().flat_map(|c| c.to_be_bytes()).collect()
    }

    pub fn geometry(&self) -> KeymapGeometry {
        self.geometry
    }

    /// Returns the keycode at `pos`, or `None` when out of range.
    pub fn get(&self, pos: KeyPosition) -> Option<u16> {
        self.geometry.cell_index(pos).map(|i| self.codes[i])
    }

    /// Sets the keycode at `pos`.
    ///
    /// # Errors
    ///
    /// Returns [`KeymapError::OutOfRange`] when `pos` is outside the geometry.
    pub fn set(&mut self, pos: KeyPosition, keycode: u16) -> Result<(), KeymapError> {
        let index = self
            .geometry
            .cell_index(pos)
            .ok_or_else(|| self.geometry.out_of_range(pos))?;
        self.codes[index] = keycode;
        Ok(())
    }

    /// Returns one layer as row-major rows of keycodes.
    pub fn layer(&self, layer: u8) -> Option<Vec<Vec<u16>>> {
        if layer >= self.geometry.layers || self.geometry.cols == 0 {
            return None;
        }
        let per_layer = self.geometry.cells_per_layer();
        let start = layer as usize * per_layer;
        Some(
            self.codes[start..start + per_layer]
                .chunks(self.geometry.cols as usize)
                .map(<[u16]>::to_vec)
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_offset_is_layer_major_row_major() {
        // Arrange
        let geometry = KeymapGeometry::new(4, 6, 18);

        // Act / Assert
        assert_eq!(geometry.cell_offset(KeyPosition::new(0, 0, 0)), Some(0));
        assert_eq!(geometry.cell_offset(KeyPosition::new(0, 0, 1)), Some(2));
        assert_eq!(geometry.cell_offset(KeyPosition::new(0, 1, 0)), Some(36));
        assert_eq!(geometry.cell_offset(KeyPosition::new(1, 0, 0)), Some(216));
        assert_eq!(geometry.cell_offset(KeyPosition::new(0, 6, 0)), None);
        assert_eq!(geometry.buffer_len(), 864);
    }

    #[test]
    fn test_from_buffer_decodes_big_endian_cells() {
        let geometry = KeymapGeometry::new(1, 1, 2);

        let keymap = Keymap::from_buffer(geometry, &[0x00, 0x04, 0x7E, 0x40]);

        assert_eq!(keymap.get(KeyPosition::new(0, 0, 0)), Some(0x0004));
        assert_eq!(keymap.get(KeyPosition::new(0, 0, 1)), Some(0x7E40));
    }

    #[test]
    fn test_from_short_buffer_fills_missing_cells_with_zero() {
        let geometry = KeymapGeometry::new(1, 2, 2);

        let keymap = Keymap::from_buffer(geometry, &[0x00, 0x05, 0xFF]);

        assert_eq!(keymap.layer(0), Some(vec![vec![5, 0], vec![0, 0]]));
    }

    #[test]
    fn test_set_then_to_buffer_writes_cell_at_offset() {
        // Arrange
        let geometry = KeymapGeometry::new(2, 2, 3);
        let mut keymap = Keymap::empty(geometry);
        let pos = KeyPosition::new(1, 0, 2);

        // Act
        keymap.set(pos, 0xABCD).unwrap();
        let buffer = keymap.to_buffer();

        // Assert
        let offset = geometry.cell_offset(pos).unwrap();
        assert_eq!(buffer.len(), geometry.buffer_len());
        assert_eq!(buffer[offset..offset + 2], [0xAB, 0xCD]);
        assert_eq!(Keymap::from_buffer(geometry, &buffer), keymap);
    }

    #[test]
    fn test_set_out_of_range_is_rejected() {
        let mut keymap = Keymap::empty(KeymapGeometry::new(1, 1, 1));

        let result = keymap.set(KeyPosition::new(0, 0, 1), 4);

        assert!(matches!(result, Err(KeymapError::OutOfRange { .. })));
    }

    #[test]
    fn test_layer_out_of_range_is_none() {
        let keymap = Keymap::empty(KeymapGeometry::new(2, 1, 1));
        assert!(keymap.layer(2).is_none());
    }
}
