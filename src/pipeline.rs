//! Pipeline orchestration: parse, rasterize, pack, encode, emit
//!
//! [`assemble`] runs every stage on in-memory inputs and returns all the
//! outputs at once, so callers never observe partial results: either the
//! whole conversion succeeds or nothing gets written.

use image::{imageops, RgbaImage};
use thiserror::Error;

use crate::color::ColorMatcher;
use crate::emit::{self, EmitContext};
use crate::metasprite::{encode_cel, EncodeError};
use crate::models::SheetDoc;
use crate::pack::{pack, PackError, Packing};
use crate::parser::ParseError;
use crate::raster::{rasterize, CelRaster, RasterError};
use crate::tiles::TileInterner;

/// Error from any pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error(transparent)]
    Pack(#[from] PackError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("flip sheet is {flip_w}x{flip_h}, sprite sheet is {main_w}x{main_h}")]
    FlipSizeMismatch { flip_w: u32, flip_h: u32, main_w: u32, main_h: u32 },
}

/// Conversion settings, mostly mirrored from the command line.
#[derive(Debug, Clone)]
pub struct Options {
    pub bank_size: usize,
    pub prefix: String,
    pub segment: String,
    /// Source names, echoed into output comments.
    pub strips_file: String,
    pub image_file: String,
    pub flip_file: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bank_size: 32,
            prefix: String::new(),
            segment: "RODATA".to_string(),
            strips_file: String::new(),
            image_file: String::new(),
            flip_file: None,
        }
    }
}

/// Every output of a successful conversion.
#[derive(Debug)]
pub struct Artifacts {
    pub doc: SheetDoc,
    /// The sheet as rasterized (mirrored when `hflip` was declared).
    pub sheet: RgbaImage,
    pub interner: TileInterner,
    pub rasters: Vec<CelRaster>,
    pub packing: Packing,
    /// Metasprite byte stream per cel, in declaration order.
    pub streams: Vec<Vec<u8>>,
    pub chr: Vec<u8>,
    pub asm: String,
    pub frame_numbers: String,
}

/// Run the whole conversion on in-memory inputs.
pub fn assemble(
    doc: SheetDoc,
    sheet: RgbaImage,
    flip_sheet: Option<RgbaImage>,
    options: &Options,
) -> Result<Artifacts, PipelineError> {
    if let Some(flip) = &flip_sheet {
        if flip.dimensions() != sheet.dimensions() {
            return Err(PipelineError::FlipSizeMismatch {
                flip_w: flip.width(),
                flip_h: flip.height(),
                main_w: sheet.width(),
                main_h: sheet.height(),
            });
        }
    }

    // A mirrored document flips the artwork once up front; the rasterizer
    // reflects all parsed coordinates to match.
    let (sheet, flip_sheet) = if doc.hflipped {
        (imageops::flip_horizontal(&sheet), flip_sheet.map(|f| imageops::flip_horizontal(&f)))
    } else {
        (sheet, flip_sheet)
    };

    let matcher = ColorMatcher::new(doc.backdrop, &doc.palettes);
    let mut interner = TileInterner::new();
    let rasters = rasterize(&doc, &sheet, flip_sheet.as_ref(), &matcher, &mut interner)?;

    let packing = pack(&doc, &rasters, options.bank_size)?;

    let mut streams = Vec::with_capacity(doc.cels.len());
    for (i, cel) in doc.cels.iter().enumerate() {
        let b = packing.bank_of[i];
        streams.push(encode_cel(&cel.name, &rasters[i].rows, &packing.banks[b], b)?);
    }

    let chr = emit::chr_data(&packing.banks, &interner, options.bank_size);
    let ctx = EmitContext {
        prefix: options.prefix.clone(),
        segment: options.segment.clone(),
        strips_file: options.strips_file.clone(),
        image_file: options.image_file.clone(),
        flip_file: options.flip_file.clone(),
    };
    let asm = emit::asm_text(&doc, &packing, &streams, interner.len(), options.bank_size, &ctx);
    let frame_numbers = emit::frame_numbers_text(&doc, &packing, &streams);

    Ok(Artifacts {
        doc,
        sheet,
        interner,
        rasters,
        packing,
        streams,
        chr,
        asm,
        frame_numbers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;
    use image::Rgba;

    const HEADER: &str = "backdrop #0CF\npalette 0 #000 #F00 #FF0\n";

    fn backdrop_sheet(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([0, 204, 255, 255]))
    }

    #[test]
    fn test_assemble_minimal() {
        let doc = parse_str(&format!("{HEADER}frame a 0 0 8 16\nstrip 0\n")).unwrap();
        let mut sheet = backdrop_sheet(8, 16);
        sheet.put_pixel(7, 0, Rgba([255, 0, 0, 255]));
        let art = assemble(doc, sheet, None, &Options::default()).unwrap();
        assert_eq!(art.packing.banks.len(), 1);
        assert_eq!(art.interner.len(), 1);
        assert_eq!(art.chr.len(), 32 * emit::CHR_TILE_BYTES);
        assert!(art.asm.contains("NUMFRAMES = 1"));
        assert!(art.frame_numbers.contains("FRAME_a=0"));
    }

    #[test]
    fn test_flip_sheet_size_mismatch() {
        let doc = parse_str(&format!("{HEADER}frame a 0 0 8 16\nstrip 0\n")).unwrap();
        let err = assemble(
            doc,
            backdrop_sheet(8, 16),
            Some(backdrop_sheet(16, 16)),
            &Options::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::FlipSizeMismatch { flip_w: 16, .. }));
    }

    #[test]
    fn test_error_propagates_from_packer() {
        // One cel of sixteen distinct tiles against eight-tile banks.
        let doc = parse_str(&format!("{HEADER}frame a 0 0 64 32\nstrip 0\n")).unwrap();
        let mut sheet = backdrop_sheet(64, 32);
        for band in 0..2u32 {
            for col in 0..8u32 {
                sheet.put_pixel(col * 8, band * 16 + col + band * 8, Rgba([255, 0, 0, 255]));
            }
        }
        let err =
            assemble(doc, sheet, None, &Options { bank_size: 8, ..Default::default() })
                .unwrap_err();
        assert!(matches!(err, PipelineError::Pack(PackError::CelTooLarge { .. })));
    }
}
