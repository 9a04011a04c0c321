//! Celpack - sprite sheets to banked 8x16 tile data and metasprite maps
//!
//! This library converts a hand-authored sprite sheet (a raster image plus
//! a cel-position file) into the data tables an 8-bit console with banked
//! 8x16-pixel tile memory consumes:
//!
//! - Parse the cel-position file into palettes, frames, and lookup tables
//! - Cut each frame's strips into 8x16 tiles, deduplicated up to mirroring
//! - Assign frames to fixed-size tile banks (overload-and-remove packing)
//! - Emit CHR tile data, metasprite byte streams, and ca65 tables
//!
//! # Quick Start
//!
//! ```no_run
//! use celpack::{parse_str, assemble, Options};
//!
//! let doc = parse_str(std::fs::read_to_string("Hero.strips").unwrap().as_str()).unwrap();
//! let sheet = image::open("Hero.png").unwrap().to_rgba8();
//! let artifacts = assemble(doc, sheet, None, &Options::default()).unwrap();
//! std::fs::write("Hero.chr", &artifacts.chr).unwrap();
//! std::fs::write("Hero.s", &artifacts.asm).unwrap();
//! ```

pub mod cli;
pub mod color;
pub mod debugimg;
pub mod emit;
pub mod metasprite;
pub mod models;
pub mod pack;
pub mod parser;
pub mod pipeline;
pub mod raster;
pub mod tiles;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// Core data types
pub use models::{Cel, Loc, Rect, Rgb, SheetDoc, Strip};

// Parsing
pub use parser::{parse_reader, parse_str, ParseError};

// Color
pub use color::{parse_color, ColorError, ColorMatcher};

// Tiles
pub use tiles::{pair_candidates, Tile, TileInterner, TileRef};

// Stages
pub use metasprite::{encode_cel, EncodeError};
pub use pack::{pack, Bank, PackError, Packing};
pub use raster::{rasterize, CelRaster, RasterError};

// Pipeline
pub use pipeline::{assemble, Artifacts, Options, PipelineError};
