use hashbrown::HashMap;
use mordant::PlayerId;

/// Spatial hash misuse. These indicate game-logic bugs rather than client
/// behavior, so callers log and skip instead of crashing the tick.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SpatialError {
    AlreadyTracked(PlayerId),
    Unknown(PlayerId),
}

#[derive(Debug, Copy, Clone)]
struct Occupant {
    id: PlayerId,
    x: i16,
    y: i16,
}

/// Uniform grid over the tile world. Each cell holds the players inside it
/// in insertion order; `entity_cells` records which cell a player currently
/// occupies.
///
/// The stored cell key is the source of truth on removal and update. The
/// player's live position must never be used to find the old cell; the
/// position is updated before the hash is told about the move, and deriving
/// the cell from it would leave a ghost entry behind.
pub struct SpatialHash {
    cell_size: i16,
    grid_width: usize,
    grid_height: usize,
    cells: Vec<Vec<Occupant>>,
    entity_cells: HashMap<PlayerId, (u16, u16)>,
}

impl SpatialHash {
    /// Builds the grid for a `width × height` world. The cell side is
    /// `2 × view_range + 1`, so a range query touches at most nine cells.
    pub fn new(width: i16, height: i16, view_range: i16) -> SpatialHash {
        assert!(width > 0 && height > 0, "World dimensions must be positive");
        assert!(view_range > 0, "View range must be positive");

        let cell_size = 2 * view_range + 1;
        let grid_width = (width as usize + cell_size as usize - 1) / cell_size as usize;
        let grid_height = (height as usize + cell_size as usize - 1) / cell_size as usize;

        SpatialHash {
            cell_size,
            grid_width,
            grid_height,
            cells: vec![Vec::new(); grid_width * grid_height],
            entity_cells: HashMap::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entity_cells.len()
    }

    #[inline]
    fn cell_of(&self, x: i16, y: i16) -> (u16, u16) {
        debug_assert!(x >= 0 && y >= 0, "Tracked positions are in-bounds");

        let cx = (x / self.cell_size) as usize;
        let cy = (y / self.cell_size) as usize;

        (
            cx.min(self.grid_width - 1) as u16,
            cy.min(self.grid_height - 1) as u16,
        )
    }

    #[inline]
    fn cell_index(&self, (cx, cy): (u16, u16)) -> usize {
        cy as usize * self.grid_width + cx as usize
    }

    /// Starts tracking a player at the given position.
    pub fn add(&mut self, id: PlayerId, x: i16, y: i16) -> Result<(), SpatialError> {
        if self.entity_cells.contains_key(&id) {
            return Err(SpatialError::AlreadyTracked(id));
        }

        let cell = self.cell_of(x, y);
        let index = self.cell_index(cell);

        self.cells[index].push(Occupant { id, x, y });
        self.entity_cells.insert(id, cell);

        Ok(())
    }

    /// Stops tracking a player. The cell is found through the stored key.
    pub fn remove(&mut self, id: PlayerId) -> Result<(), SpatialError> {
        let cell = self.entity_cells.remove(&id).ok_or(SpatialError::Unknown(id))?;
        let index = self.cell_index(cell);

        let occupants = &mut self.cells[index];
        let position = occupants
            .iter()
            .position(|occ| occ.id == id)
            .expect("Entity cell key out of sync");
        occupants.remove(position);

        Ok(())
    }

    /// Moves a tracked player to a new position, migrating between cells
    /// when the cell key changes.
    pub fn update(&mut self, id: PlayerId, new_x: i16, new_y: i16) -> Result<(), SpatialError> {
        let old_cell = *self.entity_cells.get(&id).ok_or(SpatialError::Unknown(id))?;
        let new_cell = self.cell_of(new_x, new_y);

        if old_cell == new_cell {
            let index = self.cell_index(old_cell);
            let occupant = self.cells[index]
                .iter_mut()
                .find(|occ| occ.id == id)
                .expect("Entity cell key out of sync");

            occupant.x = new_x;
            occupant.y = new_y;
            return Ok(());
        }

        let old_index = self.cell_index(old_cell);
        let position = self.cells[old_index]
            .iter()
            .position(|occ| occ.id == id)
            .expect("Entity cell key out of sync");
        self.cells[old_index].remove(position);

        let new_index = self.cell_index(new_cell);
        self.cells[new_index].push(Occupant {
            id,
            x: new_x,
            y: new_y,
        });
        self.entity_cells.insert(id, new_cell);

        Ok(())
    }

    /// Streams every tracked player whose position lies within the Chebyshev
    /// `range` of `(x, y)`, including any player exactly at the center. No
    /// result vector is allocated; the closure receives `(id, x, y)`.
    pub fn for_each_in_range<F: FnMut(PlayerId, i16, i16)>(
        &self,
        x: i16,
        y: i16,
        range: i16,
        mut f: F,
    ) {
        let (min_cx, min_cy) = self.cell_of((x - range).max(0), (y - range).max(0));
        let (max_cx, max_cy) = self.cell_of(
            (x.saturating_add(range)).max(0),
            (y.saturating_add(range)).max(0),
        );

        for cy in min_cy..=max_cy {
            for cx in min_cx..=max_cx {
                for occ in &self.cells[self.cell_index((cx, cy))] {
                    if (occ.x - x).abs() <= range && (occ.y - y).abs() <= range {
                        f(occ.id, occ.x, occ.y);
                    }
                }
            }
        }
    }

    /// True when some player other than `exclude` stands exactly on the tile.
    pub fn is_occupied(&self, x: i16, y: i16, exclude: PlayerId) -> bool {
        if x < 0 || y < 0 {
            return false;
        }

        let index = self.cell_index(self.cell_of(x, y));

        self.cells[index]
            .iter()
            .any(|occ| occ.id != exclude && occ.x == x && occ.y == y)
    }

    /// Verifies the cell-key index against the grid contents. Test support.
    #[cfg(test)]
    fn check_invariants(&self) {
        for (&id, &cell) in self.entity_cells.iter() {
            let count = self.cells[self.cell_index(cell)]
                .iter()
                .filter(|occ| occ.id == id)
                .count();
            assert_eq!(count, 1, "Player {} must appear once in its cell", id);

            let elsewhere: usize = self
                .cells
                .iter()
                .enumerate()
                .filter(|(index, _)| *index != self.cell_index(cell))
                .map(|(_, occupants)| occupants.iter().filter(|occ| occ.id == id).count())
                .sum();
            assert_eq!(elsewhere, 0, "Player {} must not appear in other cells", id);
        }

        let total: usize = self.cells.iter().map(Vec::len).sum();
        assert_eq!(total, self.entity_cells.len());
    }
}
