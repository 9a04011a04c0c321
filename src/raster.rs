//! Cel rasterization: clipping strips and cutting 8x16 tiles
//!
//! Every strip is clipped to its cel's rectangle, then cut into a grid of
//! 8x16 tiles anchored at the strip's destination. Each 16-pixel band of a
//! strip becomes one metasprite row. Tiles are interned as they are cut;
//! each grid position also receives a left-facing tile, taken from the
//! pre-flipped companion sheet when one is given and from the mirror of
//! the right-facing tile otherwise.

use std::collections::BTreeSet;

use image::RgbaImage;
use thiserror::Error;

use crate::color::{ColorError, ColorMatcher};
use crate::models::{Loc, Rect, SheetDoc, Strip};
use crate::tiles::{Tile, TileInterner, TileRef, TILE_HEIGHT, TILE_WIDTH};

/// Error type for rasterization failures, naming the offending cel.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("frame '{cel}': strip is entirely {side} its clip rectangle")]
    StripOutsideClip { cel: String, side: &'static str },
    #[error("frame '{cel}': pixel ({x}, {y}) is outside the sheet")]
    OutOfBounds { cel: String, x: i32, y: i32 },
    #[error("frame '{cel}': pixel ({x}, {y}) belongs to palette {found}, strip uses palette {expected}")]
    MixedPalette { cel: String, x: i32, y: i32, expected: u8, found: u8 },
    #[error("frame '{cel}': {source}")]
    Color { cel: String, source: ColorError },
}

/// Right- and left-facing tile for one grid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairRef {
    pub main: TileRef,
    pub left: TileRef,
}

/// One 16-pixel band of a strip: a single metasprite row.
#[derive(Debug, Clone)]
pub struct Row {
    /// Leftmost tile position relative to the hotspot.
    pub x: i32,
    pub y: i32,
    pub palette: u8,
    pub tiles: Vec<PairRef>,
}

/// A rasterized cel: its rows front-to-back and the distinct tiles needed.
#[derive(Debug, Clone, Default)]
pub struct CelRaster {
    pub rows: Vec<Row>,
    pub tile_set: BTreeSet<u16>,
}

/// Rasterize every cel of `doc` against `sheet`.
///
/// When the document is mirrored (`hflip`), the caller passes the flipped
/// sheets and this function reflects every parsed coordinate around the
/// sheet width.
pub fn rasterize(
    doc: &SheetDoc,
    sheet: &RgbaImage,
    left_sheet: Option<&RgbaImage>,
    matcher: &ColorMatcher,
    interner: &mut TileInterner,
) -> Result<Vec<CelRaster>, RasterError> {
    let mut out = Vec::with_capacity(doc.cels.len());
    for cel in &doc.cels {
        let ctx = CelContext {
            name: &cel.name,
            sheet,
            left_sheet,
            matcher,
            width: sheet.width() as i32,
            hflipped: doc.hflipped,
        };
        let clip = cel.rect.expect("clip rects resolved by the parser");
        let hotspot = cel.hotspot.expect("hotspots resolved by the parser");
        let mut raster = CelRaster::default();
        for strip in &cel.strips {
            ctx.add_strip(strip, &clip, hotspot, interner, &mut raster)?;
        }
        out.push(raster);
    }
    Ok(out)
}

struct CelContext<'a> {
    name: &'a str,
    sheet: &'a RgbaImage,
    left_sheet: Option<&'a RgbaImage>,
    matcher: &'a ColorMatcher,
    width: i32,
    hflipped: bool,
}

impl CelContext<'_> {
    fn reflect_rect(&self, r: Rect) -> Rect {
        if self.hflipped {
            Rect { left: self.width - r.right(), ..r }
        } else {
            r
        }
    }

    /// Reflect a destination top-left for content `width` pixels wide.
    fn reflect_dest(&self, d: Loc, width: i32) -> Loc {
        if self.hflipped {
            Loc::new(self.width - (d.x + width), d.y)
        } else {
            d
        }
    }

    fn reflect_point(&self, p: Loc) -> Loc {
        if self.hflipped {
            Loc::new(self.width - p.x, p.y)
        } else {
            p
        }
    }

    fn add_strip(
        &self,
        strip: &Strip,
        clip: &Rect,
        hotspot: Loc,
        interner: &mut TileInterner,
        out: &mut CelRaster,
    ) -> Result<(), RasterError> {
        let src = self.reflect_rect(strip.rect);
        let hotspot = self.reflect_point(hotspot);

        let Rect { left: mut sl, top: mut st, width: mut sw, height: mut sh } = src;
        let mut padw = 0;
        let mut padh = 0;

        // `at` strips are placed verbatim; everything else is clipped to
        // the cel rectangle, remembering the clipped-off overhang so the
        // tile grid stays anchored to the strip's own origin.
        let dest = if let Some(d) = strip.dest {
            self.reflect_dest(d, src.width)
        } else {
            let clip = self.reflect_rect(*clip);
            if sl < clip.left {
                if sl + sw <= clip.left {
                    return self.outside("left of");
                }
                padw = clip.left - sl;
                sw -= padw;
                sl = clip.left;
            }
            if st < clip.top {
                if st + sh <= clip.top {
                    return self.outside("above");
                }
                padh = clip.top - st;
                sh -= padh;
                st = clip.top;
            }
            if clip.right() <= sl {
                return self.outside("right of");
            }
            sw = sw.min(clip.right() - sl);
            if clip.bottom() <= st {
                return self.outside("below");
            }
            sh = sh.min(clip.bottom() - st);
            padw %= TILE_WIDTH as i32;
            padh %= TILE_HEIGHT as i32;
            Loc::new(sl - padw, st - padh)
        };

        let th = TILE_HEIGHT as i32;
        let tw = TILE_WIDTH as i32;
        let mut pry = 0;
        while pry < sh + padh {
            let src_box_top = pry + st - padh;
            let mut tiles = Vec::new();
            let mut prx = 0;
            while prx < sw + padw {
                let src_box_left = prx + sl - padw;
                let cut_box = Rect::new(src_box_left, src_box_top, tw, th);
                let content = Rect::new(sl, st, sw, sh);
                let main = self.cut_tile(self.sheet, strip.palette, cut_box, &content)?;
                let left = match self.left_sheet {
                    Some(sheet) => self.cut_tile(sheet, strip.palette, cut_box, &content)?,
                    None => main.hflip(),
                };
                let pair = PairRef { main: interner.intern(&main), left: interner.intern(&left) };
                out.tile_set.insert(pair.main.id);
                out.tile_set.insert(pair.left.id);
                tiles.push(pair);
                prx += tw;
            }
            out.rows.push(Row {
                x: dest.x - hotspot.x,
                y: dest.y + pry - hotspot.y,
                palette: strip.palette,
                tiles,
            });
            pry += th;
        }
        Ok(())
    }

    fn outside(&self, side: &'static str) -> Result<(), RasterError> {
        Err(RasterError::StripOutsideClip { cel: self.name.to_string(), side })
    }

    /// Cut one 8x16 tile. Pixels of `cut_box` outside `content` pad with
    /// index 0; pixels inside `content` must resolve in the strip palette.
    fn cut_tile(
        &self,
        sheet: &RgbaImage,
        palette: u8,
        cut_box: Rect,
        content: &Rect,
    ) -> Result<Tile, RasterError> {
        let mut tile = Tile::blank();
        for ty in 0..TILE_HEIGHT as i32 {
            for tx in 0..TILE_WIDTH as i32 {
                let x = cut_box.left + tx;
                let y = cut_box.top + ty;
                if x < content.left || x >= content.right() || y < content.top || y >= content.bottom()
                {
                    continue;
                }
                tile.set(tx as usize, ty as usize, self.pixel(sheet, palette, x, y)?);
            }
        }
        Ok(tile)
    }

    fn pixel(&self, sheet: &RgbaImage, palette: u8, x: i32, y: i32) -> Result<u8, RasterError> {
        if x < 0 || y < 0 || x >= sheet.width() as i32 || y >= sheet.height() as i32 {
            return Err(RasterError::OutOfBounds { cel: self.name.to_string(), x, y });
        }
        let px = sheet.get_pixel(x as u32, y as u32).0;
        if px[3] < 128 {
            return Ok(0);
        }
        let rgb = [px[0], px[1], px[2]];
        if let Some(index) = self.matcher.resolve_in(palette, rgb) {
            return Ok(index);
        }
        match self.matcher.resolve_any(rgb) {
            Some((found, _)) => Err(RasterError::MixedPalette {
                cel: self.name.to_string(),
                x,
                y,
                expected: palette,
                found,
            }),
            None => Err(RasterError::Color {
                cel: self.name.to_string(),
                source: ColorError::NoMatch(rgb),
            }),
        }
    }
}
