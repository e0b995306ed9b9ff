use crate::config::WallRect;

const TILE_BLOCKED: u8 = 0x01;

/// Static grid of tile flags. Built once at startup and never mutated
/// afterwards; the game thread reads it on every move validation.
pub struct TileMap {
    width: i16,
    height: i16,
    tiles: Vec<u8>,
}

impl TileMap {
    /// An open arena with no interior walls. Everything outside the bounds
    /// still blocks.
    pub fn new(width: i16, height: i16) -> TileMap {
        assert!(width > 0 && height > 0, "Map dimensions must be positive");

        TileMap {
            width,
            height,
            tiles: vec![0; width as usize * height as usize],
        }
    }

    /// Arena with the configured wall rectangles stamped in.
    pub fn with_walls(width: i16, height: i16, walls: &[WallRect]) -> TileMap {
        let mut map = TileMap::new(width, height);

        for wall in walls {
            for y in wall.y..wall.y.saturating_add(wall.height) {
                for x in wall.x..wall.x.saturating_add(wall.width) {
                    map.set_blocked(x, y);
                }
            }
        }

        map
    }

    #[inline]
    pub fn width(&self) -> i16 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> i16 {
        self.height
    }

    /// True when `(x, y)` is outside the map or carries the blocking flag.
    #[inline]
    pub fn is_blocked(&self, x: i16, y: i16) -> bool {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return true;
        }

        self.tiles[y as usize * self.width as usize + x as usize] & TILE_BLOCKED != 0
    }

    #[inline]
    pub fn in_bounds(&self, x: i16, y: i16) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    fn set_blocked(&mut self, x: i16, y: i16) {
        if self.in_bounds(x, y) {
            self.tiles[y as usize * self.width as usize + x as usize] |= TILE_BLOCKED;
        }
    }
}
