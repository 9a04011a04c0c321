//! Debug renders and packing statistics for `-d`/`--intermediate`

use image::{Rgba, RgbaImage};

use crate::models::{Loc, Rect, SheetDoc};
use crate::pack::Packing;
use crate::tiles::{TileInterner, TILE_HEIGHT, TILE_WIDTH};

/// Outline colors per strip palette.
const STRIP_COLORS: [[u8; 3]; 4] =
    [[0, 0, 0], [255, 191, 0], [0, 191, 255], [255, 255, 255]];

/// Gray ramp used for tile-sheet renders, index 0 on a loud backdrop.
const DEBUG_PALETTE: [[u8; 3]; 4] =
    [[0, 204, 255], [0, 0, 0], [170, 170, 170], [255, 255, 255]];

fn put(img: &mut RgbaImage, x: i32, y: i32, rgb: [u8; 3]) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, Rgba([rgb[0], rgb[1], rgb[2], 255]));
    }
}

fn outline(img: &mut RgbaImage, r: Rect, rgb: [u8; 3]) {
    for x in r.left..r.right() {
        put(img, x, r.top, rgb);
        put(img, x, r.bottom() - 1, rgb);
    }
    for y in r.top..r.bottom() {
        put(img, r.left, y, rgb);
        put(img, r.right() - 1, y, rgb);
    }
}

fn line(img: &mut RgbaImage, a: Loc, b: Loc, rgb: [u8; 3]) {
    let steps = (b.x - a.x).abs().max((b.y - a.y).abs()).max(1);
    for i in 0..=steps {
        let x = a.x + (b.x - a.x) * i / steps;
        let y = a.y + (b.y - a.y) * i / steps;
        put(img, x, y, rgb);
    }
}

/// The sheet with every strip boxed, hotspots dotted, and action points
/// crossed, for eyeballing whether everything on the sheet is accounted
/// for. Geometry matches what the rasterizer saw, so the caller passes
/// the flipped sheet when `hflip` is in effect.
pub fn boxing_image(doc: &SheetDoc, sheet: &RgbaImage) -> RgbaImage {
    let mut img = sheet.clone();
    let w = sheet.width() as i32;
    let reflect_rect = |r: Rect| {
        if doc.hflipped {
            Rect { left: w - r.right(), ..r }
        } else {
            r
        }
    };
    let reflect_point = |p: Loc| if doc.hflipped { Loc::new(w - p.x, p.y) } else { p };

    for cel in &doc.cels {
        for strip in cel.strips.iter().rev() {
            let color = STRIP_COLORS[(strip.palette & 3) as usize];
            outline(&mut img, reflect_rect(strip.rect), color);
        }
    }
    for cel in &doc.cels {
        if let Some(hot) = cel.hotspot {
            let hot = reflect_point(hot);
            outline(&mut img, Rect::new(hot.x - 1, hot.y - 1, 3, 3), STRIP_COLORS[1]);
        }
    }
    for (_, ap) in &doc.actionpoints {
        for (cel, point) in doc.cels.iter().zip(&ap.points) {
            let (Some(p), Some(hot)) = (*point, cel.hotspot) else { continue };
            let p = reflect_point(p);
            let hot = reflect_point(hot);
            line(&mut img, Loc::new(p.x - 1, p.y - 1), Loc::new(p.x + 1, p.y + 1), STRIP_COLORS[1]);
            line(&mut img, Loc::new(p.x + 1, p.y - 1), Loc::new(p.x - 1, p.y + 1), STRIP_COLORS[1]);
            line(&mut img, p, hot, STRIP_COLORS[1]);
        }
    }
    img
}

/// Every bank's tiles on the debug gray ramp, one bank per row.
pub fn tile_sheet_image(packing: &Packing, interner: &TileInterner, bank_size: usize) -> RgbaImage {
    let width = (bank_size * TILE_WIDTH) as u32;
    let height = (packing.banks.len().max(1) * TILE_HEIGHT) as u32;
    let bg = DEBUG_PALETTE[0];
    let mut img = RgbaImage::from_pixel(width, height, Rgba([bg[0], bg[1], bg[2], 255]));
    for (b, bank) in packing.banks.iter().enumerate() {
        for (slot, &id) in bank.tiles.iter().enumerate() {
            let tile = interner.get(id);
            for y in 0..TILE_HEIGHT {
                for x in 0..TILE_WIDTH {
                    let rgb = DEBUG_PALETTE[tile.get(x, y) as usize];
                    put(
                        &mut img,
                        (slot * TILE_WIDTH + x) as i32,
                        (b * TILE_HEIGHT + y) as i32,
                        rgb,
                    );
                }
            }
        }
    }
    img
}

/// Packing summary on stdout.
pub fn print_stats(doc: &SheetDoc, packing: &Packing, unique_tiles: usize) {
    println!(
        "{} frames, {} unique tiles, {} banks",
        doc.cels.len(),
        unique_tiles,
        packing.banks.len()
    );
    for (b, bank) in packing.banks.iter().enumerate() {
        let names: Vec<&str> = bank.cels.iter().map(|&c| doc.cels[c].name.as_str()).collect();
        println!("bank {} ({} tiles): {}", b, bank.tiles.len(), names.join(", "));
    }
}
