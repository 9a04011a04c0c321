//! End-to-end tests for the celpack pipeline
//!
//! These build sprite sheets in memory, run the whole conversion through
//! the library API, and assert on the exact bytes that come out.

use celpack::metasprite::EncodeError;
use celpack::pack::PackError;
use celpack::parser::parse_str;
use celpack::pipeline::{assemble, Options, PipelineError};
use image::{Rgba, RgbaImage};

const BACKDROP: Rgba<u8> = Rgba([0, 204, 255, 255]);
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

const HEADER: &str = "backdrop #0CF\npalette 0 #000 #F00 #FF0\n";

fn backdrop_sheet(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_pixel(w, h, BACKDROP)
}

fn assemble_str(
    doc: &str,
    sheet: RgbaImage,
) -> Result<celpack::pipeline::Artifacts, PipelineError> {
    assemble(parse_str(doc).unwrap(), sheet, None, &Options::default())
}

/// Paint one red pixel per 8x16 tile of a `cols` x `bands` region so every
/// tile gets a distinct pattern.
fn paint_unique_tiles(sheet: &mut RgbaImage, left: u32, top: u32, cols: u32, bands: u32, salt: u32) {
    for t in 0..cols * bands {
        let x = left + (t % cols) * 8 + (t + salt) % 5;
        let y = top + (t / cols) * 16 + (t + salt) % 16;
        sheet.put_pixel(x, y, RED);
    }
}

#[test]
fn single_cel_single_strip() {
    let mut sheet = backdrop_sheet(8, 16);
    // Content only in the rightmost column keeps the cut tile canonical.
    for y in 0..16 {
        sheet.put_pixel(7, y, RED);
    }
    let art = assemble_str(&format!("{HEADER}frame stand 0 0 8 16\nstrip 0\n"), sheet).unwrap();

    assert_eq!(art.packing.banks.len(), 1);
    assert_eq!(art.interner.len(), 1);
    // One row: x = -4+128, y = -16+128, palette 0, length 1, then the
    // lone tile whose left-facing form is its own mirror.
    assert_eq!(art.streams[0], vec![124, 112, 0b0000_0000, 0x01, 0x00]);
}

#[test]
fn hflip_pair_shares_one_canonical_tile() {
    let mut sheet = backdrop_sheet(16, 16);
    sheet.put_pixel(7, 0, RED);
    sheet.put_pixel(8, 0, RED);
    let art = assemble_str(
        &format!("{HEADER}frame right 0 0 8 16\nstrip 0\nframe left 8 0 8 16\nstrip 0\n"),
        sheet,
    )
    .unwrap();

    assert_eq!(art.interner.len(), 1);
    let a = art.rasters[0].rows[0].tiles[0].main;
    let b = art.rasters[1].rows[0].tiles[0].main;
    assert_eq!(a.id, b.id);
    assert_ne!(a.hflip, b.hflip);
}

#[test]
fn disjoint_cels_pack_but_related_overflows() {
    // Two cels of 24 almost entirely distinct tiles each: fine apart,
    // over the 32-tile bank limit once `related` welds them together.
    let mut sheet = backdrop_sheet(64, 96);
    paint_unique_tiles(&mut sheet, 0, 0, 8, 3, 0);
    paint_unique_tiles(&mut sheet, 0, 48, 8, 3, 24);
    let body = "frame a 0 0 64 48\nstrip 0\nframe b 0 48 64 48\nstrip 0\n";

    let art = assemble_str(&format!("{HEADER}{body}"), sheet.clone()).unwrap();
    assert_eq!(art.packing.banks.len(), 2);

    let err = assemble_str(&format!("{HEADER}{body}related a\n"), sheet).unwrap_err();
    assert!(matches!(err, PipelineError::Pack(PackError::CelTooLarge { .. })));
}

#[test]
fn align_pads_cel_ids() {
    let mut sheet = backdrop_sheet(48, 32);
    paint_unique_tiles(&mut sheet, 0, 0, 6, 1, 0);
    paint_unique_tiles(&mut sheet, 0, 16, 6, 1, 6);
    let art = assemble_str(
        &format!("{HEADER}frame x 0 0 48 16\nstrip 0\nalign 4\nframe y 0 16 48 16\nstrip 0\n"),
        sheet,
    )
    .unwrap();

    assert_eq!(art.packing.id_of, vec![0, 4]);
    assert_eq!(art.packing.slots, vec![Some(0), None, None, None, Some(1)]);
    assert!(art.asm.contains("NUMFRAMES = 5"));
    assert!(art.asm.contains("frametobank:\n  .byte 0,255,255,255,0"));
    assert!(art.frame_numbers.contains("FRAME_y=4"));
}

#[test]
fn row_of_nine_tiles_fails_to_encode() {
    let sheet = backdrop_sheet(72, 16);
    let err = assemble_str(&format!("{HEADER}frame wide 0 0 72 16\nstrip 0\n"), sheet).unwrap_err();
    assert!(matches!(err, PipelineError::Encode(EncodeError::RowTooWide { len: 9, .. })));
}

#[test]
fn row_at_minus_128_collides_with_terminator() {
    let sheet = backdrop_sheet(8, 16);
    let err = assemble_str(
        &format!("{HEADER}frame far 0 0 8 16\nstrip 0\nhotspot 128 16\n"),
        sheet,
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::Encode(EncodeError::TerminatorClash { x: -128, .. })));
}

#[test]
fn bank_invariants_hold() {
    // A handful of partially overlapping cels across several banks.
    let mut sheet = backdrop_sheet(64, 128);
    for row in 0..4 {
        paint_unique_tiles(&mut sheet, 0, row * 32, 8, 2, row * 7);
    }
    let mut body = String::new();
    for row in 0..4 {
        body.push_str(&format!(
            "frame f{row} 0 {} 64 32\nstrip 0\n",
            row * 32
        ));
    }
    let doc = parse_str(&format!("{HEADER}{body}")).unwrap();
    let art = assemble(doc, sheet, None, &Options { bank_size: 16, ..Default::default() }).unwrap();

    for bank in &art.packing.banks {
        assert!(bank.tiles.len() <= 16);
    }
    for (cel, raster) in art.rasters.iter().enumerate() {
        let bank = &art.packing.banks[art.packing.bank_of[cel]];
        for id in &raster.tile_set {
            assert!(bank.position(*id).is_some(), "cel {cel} tile {id} missing from its bank");
        }
    }
    // Every cel ID is unique and every slot consistent.
    for (id, slot) in art.packing.slots.iter().enumerate() {
        if let Some(cel) = slot {
            assert_eq!(art.packing.id_of[*cel], id);
        }
    }
}

#[test]
fn identical_inputs_give_identical_outputs() {
    let mut sheet = backdrop_sheet(64, 32);
    paint_unique_tiles(&mut sheet, 0, 0, 8, 1, 3);
    paint_unique_tiles(&mut sheet, 0, 16, 8, 1, 5);
    let src = format!(
        "{HEADER}frame a 0 0 64 16\nstrip 0\naka start\nframe b 0 16 64 16\nstrip 0\nrelated a\n"
    );
    let run = || assemble_str(&src, sheet.clone()).unwrap();
    let (one, two) = (run(), run());
    assert_eq!(one.chr, two.chr);
    assert_eq!(one.asm, two.asm);
    assert_eq!(one.frame_numbers, two.frame_numbers);
}

#[test]
fn chr_tiles_land_in_slot_order() {
    let mut sheet = backdrop_sheet(8, 16);
    for y in 0..16 {
        sheet.put_pixel(7, y, RED);
    }
    let art = assemble_str(&format!("{HEADER}frame a 0 0 8 16\nstrip 0\n"), sheet).unwrap();
    // Red resolves to palette index 2: high plane only, rightmost pixel.
    assert_eq!(art.chr.len(), 32 * 32);
    assert_eq!(&art.chr[0..8], &[0u8; 8]);
    assert_eq!(&art.chr[8..16], &[0x01; 8]);
    assert_eq!(&art.chr[16..24], &[0u8; 8]);
    assert_eq!(&art.chr[24..32], &[0x01; 8]);
    assert!(art.chr[32..].iter().all(|&b| b == 0));
}

#[test]
fn flip_sheet_pairs_sit_adjacent() {
    // The emblem tile differs between facings, so the left variant gets
    // the next bank slot and the tile byte goes odd.
    let mut sheet = backdrop_sheet(8, 16);
    sheet.put_pixel(6, 2, RED);
    sheet.put_pixel(7, 3, RED);
    let mut flip = backdrop_sheet(8, 16);
    flip.put_pixel(6, 2, Rgba([255, 255, 0, 255]));
    let doc = parse_str(&format!("{HEADER}frame a 0 0 8 16\nstrip 0\n")).unwrap();
    let art = assemble(doc, sheet, Some(flip), &Options::default()).unwrap();

    assert_eq!(art.interner.len(), 2);
    let stream = &art.streams[0];
    assert_eq!(stream[3] & 0x01, 0x01);
    assert_eq!(art.packing.banks[0].tiles.len(), 2);
}

#[test]
fn repeats_and_tables_flow_through_to_asm() {
    let mut sheet = backdrop_sheet(16, 16);
    sheet.put_pixel(7, 0, RED);
    let art = assemble_str(
        &format!(
            "{HEADER}table animspeed\nattribute speed in animspeed\n\
             frame a 0 0 8 16\nstrip 0\nspeed 5\n\
             frame b 0 0 8 16\nrepeats a\nspeed 7\n"
        ),
        sheet,
    )
    .unwrap();

    // Zero-offset repeats keeps both cels in one bank sharing one tile.
    assert_eq!(art.packing.banks.len(), 1);
    assert_eq!(art.interner.len(), 1);
    // Identical streams share a label body.
    assert!(art.asm.contains("mspr_a:\nmspr_b:\n"));
    assert!(art.asm.contains("animspeed:\n  .byte 5,7"));
}

#[test]
fn hflip_document_mirrors_output() {
    // The same art, mirrored, should produce a mirrored-but-equivalent
    // stream: same sizes, same bank count, reflected row positions.
    let mut sheet = backdrop_sheet(16, 16);
    sheet.put_pixel(0, 0, RED);
    let plain = assemble_str(&format!("{HEADER}frame a 0 0 16 16\nstrip 0\n"), sheet.clone())
        .unwrap();
    let mirrored = assemble_str(&format!("{HEADER}hflip\nframe a 0 0 16 16\nstrip 0\n"), sheet)
        .unwrap();
    assert_eq!(plain.interner.len(), mirrored.interner.len());
    assert_eq!(plain.streams[0].len(), mirrored.streams[0].len());
    assert_eq!(plain.streams[0][0], mirrored.streams[0][0]);
}

#[test]
fn cli_convert_writes_all_outputs() {
    use celpack::cli::{convert, Cli};
    use clap::Parser;

    let dir = tempfile::tempdir().unwrap();
    let strips_path = dir.path().join("hero.strips");
    let image_path = dir.path().join("hero.png");
    let chr_path = dir.path().join("hero.chr");
    let asm_path = dir.path().join("hero.s");
    let nums_path = dir.path().join("hero.inc");

    std::fs::write(&strips_path, format!("{HEADER}frame stand 0 0 8 16\nstrip 0\n")).unwrap();
    let mut sheet = backdrop_sheet(8, 16);
    for y in 0..16 {
        sheet.put_pixel(7, y, RED);
    }
    sheet.save(&image_path).unwrap();

    let cli = Cli::parse_from([
        "celpack",
        strips_path.to_str().unwrap(),
        image_path.to_str().unwrap(),
        chr_path.to_str().unwrap(),
        asm_path.to_str().unwrap(),
        "--write-frame-numbers",
        nums_path.to_str().unwrap(),
        "--prefix",
        "Hero",
    ]);
    convert(&cli).unwrap();

    let chr = std::fs::read(&chr_path).unwrap();
    assert_eq!(chr.len(), 32 * 32);
    let asm = std::fs::read_to_string(&asm_path).unwrap();
    assert!(asm.contains(".exportzp HeroNUMFRAMES = 1"));
    assert!(asm.contains("mspr_stand:"));
    let nums = std::fs::read_to_string(&nums_path).unwrap();
    assert!(nums.contains("FRAME_stand=0"));
}

#[test]
fn cli_convert_parse_error_names_line() {
    use celpack::cli::{convert, Cli};
    use clap::Parser;

    let dir = tempfile::tempdir().unwrap();
    let strips_path = dir.path().join("bad.strips");
    let image_path = dir.path().join("bad.png");
    std::fs::write(&strips_path, format!("{HEADER}frame a 0 0 8 16\nmystery 1\n")).unwrap();
    backdrop_sheet(8, 16).save(&image_path).unwrap();

    let cli = Cli::parse_from([
        "celpack",
        strips_path.to_str().unwrap(),
        image_path.to_str().unwrap(),
    ]);
    let err = convert(&cli).unwrap_err();
    assert!(err.to_string().contains("line 4"));
}
