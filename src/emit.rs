//! Output generation: CHR data, ca65 tables, frame-number exports
//!
//! Everything here builds bytes and text in memory; the CLI writes files
//! only after the whole pipeline has succeeded.

use crate::models::{SheetDoc, ACTION_POINT_UNSET};
use crate::pack::{Bank, Packing};
use crate::tiles::{Tile, TileInterner};

/// Bytes one 8x16 tile occupies in CHR: two stacked 8x8 planar tiles.
pub const CHR_TILE_BYTES: usize = 32;

/// Serialize an 8x16 tile as two 8x8 planar tiles, low plane first.
pub fn tile_to_chr(tile: &Tile) -> [u8; CHR_TILE_BYTES] {
    let mut out = [0u8; CHR_TILE_BYTES];
    for (y, row) in tile.rows().enumerate() {
        let half = y / 8;
        let mut low = 0u8;
        let mut high = 0u8;
        for (x, &px) in row.iter().enumerate() {
            low |= (px & 1) << (7 - x);
            high |= ((px >> 1) & 1) << (7 - x);
        }
        out[half * 16 + y % 8] = low;
        out[half * 16 + 8 + y % 8] = high;
    }
    out
}

/// Concatenate all banks, padding each to `bank_size` tiles with zeroes.
pub fn chr_data(banks: &[Bank], interner: &TileInterner, bank_size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(banks.len() * bank_size * CHR_TILE_BYTES);
    for bank in banks {
        for &id in &bank.tiles {
            out.extend_from_slice(&tile_to_chr(interner.get(id)));
        }
        out.resize(out.len() + (bank_size - bank.tiles.len()) * CHR_TILE_BYTES, 0);
    }
    out
}

/// Format values as `  .byte` rows of 16, rendering negatives as `<-n` so
/// ca65 takes their low byte.
pub fn ca65_byte_rows(values: &[i32]) -> String {
    let rendered: Vec<String> = values
        .iter()
        .map(|&v| if (-128..0).contains(&v) { format!("<{v}") } else { v.to_string() })
        .collect();
    rendered
        .chunks(16)
        .map(|chunk| format!("  .byte {}", chunk.join(",")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format symbols as `  .addr` rows of 4.
pub fn ca65_addr_rows(symbols: &[String]) -> String {
    symbols
        .chunks(4)
        .map(|chunk| format!("  .addr {}", chunk.join(",")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn hex_byte_rows(stream: &[u8]) -> Vec<String> {
    // Re-split the flat stream into its rows for readable output: each
    // row header's length field says how many tile bytes follow.
    let mut lines = Vec::new();
    let mut i = 0;
    while stream[i] != 0 {
        let len = ((stream[i + 2] >> 2) & 0x07) as usize + 1;
        let row = &stream[i..i + 3 + len];
        let rendered: Vec<String> = row.iter().map(|b| format!("${b:02X}")).collect();
        lines.push(format!("  .byte {}", rendered.join(",")));
        i += 3 + len;
    }
    lines.push("  .byte 0".to_string());
    lines
}

/// Everything the assembly emitter needs besides the pipeline results.
#[derive(Debug, Clone, Default)]
pub struct EmitContext {
    pub prefix: String,
    pub segment: String,
    pub strips_file: String,
    pub image_file: String,
    pub flip_file: Option<String>,
}

/// Number of tile slots the CHR index space spans: full banks plus the
/// occupied part of the last one.
pub fn num_tiles(banks: &[Bank], bank_size: usize) -> usize {
    match banks.last() {
        Some(last) => bank_size * (banks.len() - 1) + last.tiles.len(),
        None => 0,
    }
}

/// Render the metasprite assembly file.
pub fn asm_text(
    doc: &SheetDoc,
    packing: &Packing,
    streams: &[Vec<u8>],
    unique_tiles: usize,
    bank_size: usize,
    ctx: &EmitContext,
) -> String {
    let p = &ctx.prefix;
    let stream_total: usize = packing
        .slots
        .iter()
        .flatten()
        .map(|&cel| streams[cel].len() + 3)
        .sum();

    let mut lines = vec![
        "; metasprite map generated by celpack".to_string(),
        format!("; strips file: {}", ctx.strips_file),
        format!("; sprite sheet: {}", ctx.image_file),
    ];
    if let Some(flip) = &ctx.flip_file {
        lines.push(format!("; left-facing sprite sheet: {flip}"));
    }
    lines.push(format!("; metasprite total: {stream_total} bytes"));
    lines.push(format!("; {} unique tiles in {} pages", unique_tiles, packing.banks.len()));
    lines.push(format!(".segment \"{}\"", ctx.segment));
    lines.push(format!(".exportzp {p}NUMFRAMES = {}", packing.num_frames()));
    lines.push(format!(".exportzp {p}NUMTILES = {}", num_tiles(&packing.banks, bank_size)));
    lines.push(format!(".export {p}frametobank, {p}mspraddrs"));

    // frametobank: one byte per cel ID; padding IDs hold no cel.
    let bank_bytes: Vec<i32> = packing
        .slots
        .iter()
        .map(|slot| slot.map_or(255, |cel| packing.bank_of[cel] as i32))
        .collect();
    lines.push(format!("{p}frametobank:"));
    lines.push(ca65_byte_rows(&bank_bytes));

    let addr_syms: Vec<String> = packing
        .slots
        .iter()
        .map(|slot| slot.map_or("0".to_string(), |cel| format!("mspr_{}", doc.cels[cel].name)))
        .collect();
    lines.push(format!("{p}mspraddrs:"));
    lines.push(ca65_addr_rows(&addr_syms));

    // Cels with identical streams share one body under several labels.
    let mut seen: Vec<(&[u8], Vec<usize>)> = Vec::new();
    for &cel in packing.slots.iter().flatten() {
        match seen.iter_mut().find(|(bytes, _)| *bytes == streams[cel].as_slice()) {
            Some((_, cels)) => cels.push(cel),
            None => seen.push((&streams[cel], vec![cel])),
        }
    }
    for (bytes, cels) in seen {
        for cel in cels {
            lines.push(format!("mspr_{}:", doc.cels[cel].name));
        }
        lines.extend(hex_byte_rows(bytes));
    }

    if !doc.tables.is_empty() {
        lines.push(format!("; lookup tables {}", "-".repeat(30)));
        for table in &doc.tables {
            let pad = if doc.actionpoints.iter().any(|(_, ap)| {
                ap.x_table.as_deref() == Some(&table.name)
                    || ap.y_table.as_deref() == Some(&table.name)
            }) {
                ACTION_POINT_UNSET
            } else {
                0
            };
            let values: Vec<i32> = packing
                .slots
                .iter()
                .map(|slot| slot.map_or(pad, |cel| table.values[cel]))
                .collect();
            let segment = table.segment.as_deref().unwrap_or(&ctx.segment);
            lines.push(format!(".segment \"{segment}\""));
            lines.push(format!(".export {}", table.name));
            lines.push(format!("{}:", table.name));
            lines.push(ca65_byte_rows(&values));
        }
    }

    lines.push(String::new());
    lines.join("\n")
}

/// Render the `--write-frame-numbers` file: id, bank, and first tile
/// number for every cel and every alias, in cel-ID order.
pub fn frame_numbers_text(doc: &SheetDoc, packing: &Packing, streams: &[Vec<u8>]) -> String {
    let mut entries: Vec<(usize, &str)> = doc
        .cels
        .iter()
        .enumerate()
        .map(|(i, cel)| (packing.id_of[i], cel.name.as_str()))
        .collect();
    entries.extend(doc.aliases.iter().map(|(name, i)| (packing.id_of[*i], name.as_str())));
    entries.sort_by_key(|&(id, _)| id);

    let mut out = String::new();
    for (id, name) in entries {
        let cel = packing.slots[id].expect("cel IDs never point at padding");
        let tile = if streams[cel].len() > 1 { streams[cel][3] } else { 0xFF };
        out.push_str(&format!(
            "FRAME_{name}={id}\nFRAMEBANK_{name}={bank}\nFRAMETILENUM_{name}=${tile:02X}\n",
            bank = packing.bank_of[cel],
        ));
    }
    out
}
