//! Data model for cel-position documents (palettes, strips, cels, tables)

use std::collections::{BTreeMap, HashMap};

/// An sRGB triple. The backdrop color is reserved as fully transparent.
pub type Rgb = [u8; 3];

/// A point in sprite-sheet pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loc {
    pub x: i32,
    pub y: i32,
}

impl Loc {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A rectangle in sprite-sheet pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self { left, top, width, height }
    }

    pub fn right(&self) -> i32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.top + self.height
    }

    /// Smallest rectangle containing both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        Rect {
            left,
            top,
            width: self.right().max(other.right()) - left,
            height: self.bottom().max(other.bottom()) - top,
        }
    }
}

/// One layer of a cel: a source rectangle drawn with a single palette.
///
/// `dest` is set only by `strip ... at x y`; such strips bypass the cel's
/// clip rectangle and are copied verbatim to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strip {
    pub palette: u8,
    pub rect: Rect,
    pub dest: Option<Loc>,
}

/// A named animation frame.
#[derive(Debug, Clone)]
pub struct Cel {
    pub name: String,
    /// Line where the `frame` directive appeared, for diagnostics.
    pub line: usize,
    /// Clip rectangle. `None` until finalization infers it from strips.
    pub rect: Option<Rect>,
    pub strips: Vec<Strip>,
    /// Anchor point. `None` defaults to bottom-center at finalization.
    pub hotspot: Option<Loc>,
    /// The cel's final ID must be a multiple of this (1 = unconstrained).
    pub align: u32,
    /// Seed this cel into the earliest banks.
    pub subset: bool,
}

impl Cel {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            line,
            rect: None,
            strips: Vec::new(),
            hotspot: None,
            align: 1,
            subset: false,
        }
    }
}

/// A per-cel lookup table declared with `table`.
#[derive(Debug, Clone)]
pub struct LookupTable {
    pub name: String,
    pub line: usize,
    /// Output segment; `None` falls back to the CLI `--segment`.
    pub segment: Option<String>,
    /// One value per cel, in declaration order.
    pub values: Vec<i32>,
}

/// An action point declared with `actionpoint`, one optional point per cel.
#[derive(Debug, Clone)]
pub struct ActionPoint {
    pub points: Vec<Option<Loc>>,
    pub x_table: Option<String>,
    pub y_table: Option<String>,
}

/// Value stored for points the sheet does not define.
pub const ACTION_POINT_UNSET: i32 = -128;

/// A fully parsed and finalized cel-position document.
#[derive(Debug, Clone, Default)]
pub struct SheetDoc {
    pub backdrop: Option<Rgb>,
    /// palette id -> [(color, palette index 1..=3)]
    pub palettes: BTreeMap<u8, Vec<(Rgb, u8)>>,
    /// Cels in declaration order. Declaration order seeds the packer.
    pub cels: Vec<Cel>,
    /// `aka` aliases: (alias, cel index).
    pub aliases: Vec<(String, usize)>,
    /// `related` pairs resolved to cel indices.
    pub related: Vec<(usize, usize)>,
    pub tables: Vec<LookupTable>,
    pub actionpoints: Vec<(String, ActionPoint)>,
    /// The sheet is mirrored before rasterization.
    pub hflipped: bool,
    index: HashMap<String, usize>,
}

impl SheetDoc {
    pub fn cel_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn push_cel(&mut self, cel: Cel) -> usize {
        let i = self.cels.len();
        self.index.insert(cel.name.clone(), i);
        self.cels.push(cel);
        i
    }

    pub fn table(&self, name: &str) -> Option<&LookupTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> Option<&mut LookupTable> {
        self.tables.iter_mut().find(|t| t.name == name)
    }
}
