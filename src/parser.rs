//! Line-oriented parser for cel-position files
//!
//! The format is a sequence of whitespace-split token lines. `#` starts a
//! comment. Global directives declare palettes, tables and options; a
//! `frame` directive opens a cel block that runs until the next `frame`,
//! a `table` directive, or end of file. Keywords registered through
//! `table`/`attribute`/`flag`/`actionpoint` become valid lines inside cel
//! blocks.

use std::collections::HashMap;
use std::io::BufRead;

use thiserror::Error;

use crate::color::{parse_color, ColorError};
use crate::models::{ActionPoint, Cel, Loc, LookupTable, Rect, SheetDoc, Strip, ACTION_POINT_UNSET};

/// Error type for cel-position file failures, citing the offending line
/// or cel.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: unknown keyword '{word}'")]
    UnknownKeyword { line: usize, word: String },
    #[error("line {line}: malformed number '{token}'")]
    BadNumber { line: usize, token: String },
    #[error("line {line}: {source}")]
    BadColor { line: usize, source: ColorError },
    #[error("line {line}: {keyword} expects {expected}")]
    MissingArgs { line: usize, keyword: &'static str, expected: &'static str },
    #[error("line {line}: frame '{name}' already defined on line {prev}")]
    DuplicateFrame { line: usize, name: String, prev: usize },
    #[error("line {line}: table '{name}' already declared on line {prev}")]
    DuplicateTable { line: usize, name: String, prev: usize },
    #[error("line {line}: backdrop already defined on line {prev}")]
    DuplicateBackdrop { line: usize, prev: usize },
    #[error("line {line}: repeats target '{name}' is not defined yet")]
    RepeatsUndefined { line: usize, name: String },
    #[error("line {line}: align factor must be at least 2")]
    BadAlign { line: usize },
    #[error("line {line}: palette id {id} out of range 0-3")]
    BadPaletteId { line: usize, id: i32 },
    #[error("line {line}: palette index {index} out of range 1-3")]
    BadPaletteIndex { line: usize, index: i32 },
    #[error("line {line}: '{keyword}' is only valid inside a frame block")]
    OutsideFrame { line: usize, keyword: String },
    #[error("line {line}: table '{name}' is not declared")]
    UnknownTable { line: usize, name: String },
    #[error("line {line}: strip has no rectangle and frame '{cel}' has no clip rectangle")]
    NoClipRect { line: usize, cel: String },
    #[error("line {line}: strip in frame '{cel}' has non-positive size")]
    BadStripSize { line: usize, cel: String },
    #[error("frame '{name}' (line {line}) has no strips and needs an explicit bounding box (try 0 0 8 8)")]
    EmptyFrame { name: String, line: usize },
    #[error("frame '{cel}' uses undeclared palette {palette}")]
    UndeclaredPalette { cel: String, palette: u8 },
    #[error("frame '{cel}' is related to undefined frame '{name}'")]
    UnknownRelated { cel: String, name: String },
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse a whole document from a string.
pub fn parse_str(src: &str) -> Result<SheetDoc, ParseError> {
    let mut reader = Reader::new();
    for line in src.lines() {
        reader.append(line)?;
    }
    reader.finish()
}

/// Parse a whole document from a buffered reader.
pub fn parse_reader<R: BufRead>(input: R) -> Result<SheetDoc, ParseError> {
    let mut reader = Reader::new();
    for line in input.lines() {
        reader.append(&line?)?;
    }
    reader.finish()
}

fn parse_int_token(tok: &str) -> Option<i32> {
    if let Some(hex) = tok.strip_prefix('$') {
        i32::from_str_radix(hex, 16).ok()
    } else if let Some(hex) = tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
        i32::from_str_radix(hex, 16).ok()
    } else {
        tok.parse().ok()
    }
}

/// Incremental line reader building a [`SheetDoc`].
struct Reader {
    doc: SheetDoc,
    line: usize,
    /// Index of the open cel block, if any.
    cur: Option<usize>,
    pending_align: Option<u32>,
    backdrop_line: Option<usize>,
    table_lines: HashMap<String, usize>,
    /// Unresolved `related` pairs: (line, other name, current cel index).
    related_names: Vec<(usize, String, usize)>,
    /// attribute keyword -> table name
    attributes: HashMap<String, String>,
    /// flag keyword -> (table name, value)
    flags: HashMap<String, (String, i32)>,
    ap_index: HashMap<String, usize>,
}

impl Reader {
    fn new() -> Self {
        Self {
            doc: SheetDoc::default(),
            line: 0,
            cur: None,
            pending_align: None,
            backdrop_line: None,
            table_lines: HashMap::new(),
            related_names: Vec::new(),
            attributes: HashMap::new(),
            flags: HashMap::new(),
            ap_index: HashMap::new(),
        }
    }

    fn append(&mut self, raw: &str) -> Result<(), ParseError> {
        self.line += 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        match words[0] {
            "backdrop" => self.append_backdrop(&words),
            "palette" => self.append_palette(&words),
            "hflip" => {
                self.doc.hflipped = true;
                Ok(())
            }
            "align" => self.append_align(&words),
            "table" => self.append_table(&words),
            "attribute" => self.append_attribute(&words),
            "flag" => self.append_flag(&words),
            "actionpoint" => self.append_actionpoint(&words),
            "frame" => self.append_frame(&words),
            "aka" => self.append_aka(&words),
            "strip" => self.append_strip(&words),
            "hotspot" => self.append_hotspot(&words),
            "repeats" => self.append_repeats(&words),
            "related" => self.append_related(&words),
            "subset" => self.append_subset(&words),
            _ => self.append_user_keyword(&words),
        }
    }

    fn int(&self, tok: &str) -> Result<i32, ParseError> {
        parse_int_token(tok).ok_or_else(|| ParseError::BadNumber {
            line: self.line,
            token: tok.to_string(),
        })
    }

    fn color(&self, tok: &str) -> Result<[u8; 3], ParseError> {
        parse_color(tok).map_err(|source| ParseError::BadColor { line: self.line, source })
    }

    fn palette_id(&self, tok: &str) -> Result<u8, ParseError> {
        let id = self.int(tok)?;
        if !(0..4).contains(&id) {
            return Err(ParseError::BadPaletteId { line: self.line, id });
        }
        Ok(id as u8)
    }

    fn current(&mut self, keyword: &str) -> Result<usize, ParseError> {
        self.cur.ok_or_else(|| ParseError::OutsideFrame {
            line: self.line,
            keyword: keyword.to_string(),
        })
    }

    fn check_table(&self, name: &str) -> Result<(), ParseError> {
        if self.doc.table(name).is_none() {
            return Err(ParseError::UnknownTable { line: self.line, name: name.to_string() });
        }
        Ok(())
    }

    fn append_backdrop(&mut self, words: &[&str]) -> Result<(), ParseError> {
        if let Some(prev) = self.backdrop_line {
            return Err(ParseError::DuplicateBackdrop { line: self.line, prev });
        }
        let &color = words.get(1).ok_or(ParseError::MissingArgs {
            line: self.line,
            keyword: "backdrop",
            expected: "a color",
        })?;
        self.doc.backdrop = Some(self.color(color)?);
        self.backdrop_line = Some(self.line);
        Ok(())
    }

    // palette <id> <color>[=<index>] ...
    fn append_palette(&mut self, words: &[&str]) -> Result<(), ParseError> {
        if words.len() < 3 {
            return Err(ParseError::MissingArgs {
                line: self.line,
                keyword: "palette",
                expected: "an id and at least one color",
            });
        }
        let id = self.palette_id(words[1])?;
        let mut colors = Vec::new();
        for entry in &words[2..] {
            let (color_tok, index) = match entry.split_once('=') {
                Some((c, i)) => (c, self.int(i)?),
                None => (*entry, colors.len() as i32 + 1),
            };
            if !(1..4).contains(&index) {
                return Err(ParseError::BadPaletteIndex { line: self.line, index });
            }
            colors.push((self.color(color_tok)?, index as u8));
        }
        self.doc.palettes.insert(id, colors);
        Ok(())
    }

    fn append_align(&mut self, words: &[&str]) -> Result<(), ParseError> {
        let &tok = words.get(1).ok_or(ParseError::MissingArgs {
            line: self.line,
            keyword: "align",
            expected: "a factor",
        })?;
        let k = self.int(tok)?;
        if k <= 1 {
            return Err(ParseError::BadAlign { line: self.line });
        }
        self.pending_align = Some(k as u32);
        Ok(())
    }

    // table <name> [in <segment>]
    fn append_table(&mut self, words: &[&str]) -> Result<(), ParseError> {
        let &name = words.get(1).ok_or(ParseError::MissingArgs {
            line: self.line,
            keyword: "table",
            expected: "a name",
        })?;
        if let Some(&prev) = self.table_lines.get(name) {
            return Err(ParseError::DuplicateTable { line: self.line, name: name.to_string(), prev });
        }
        let segment = match words.get(2) {
            Some(&"in") => Some(
                words
                    .get(3)
                    .ok_or(ParseError::MissingArgs {
                        line: self.line,
                        keyword: "table",
                        expected: "a segment after 'in'",
                    })?
                    .to_string(),
            ),
            _ => None,
        };
        self.table_lines.insert(name.to_string(), self.line);
        // Frames already seen get the default value.
        self.doc.tables.push(LookupTable {
            name: name.to_string(),
            line: self.line,
            segment,
            values: vec![0; self.doc.cels.len()],
        });
        // A table directive also closes any open frame block.
        self.cur = None;
        Ok(())
    }

    // attribute <keyword> in <tablename>
    fn append_attribute(&mut self, words: &[&str]) -> Result<(), ParseError> {
        if words.len() < 4 || words[2] != "in" {
            return Err(ParseError::MissingArgs {
                line: self.line,
                keyword: "attribute",
                expected: "<keyword> in <tablename>",
            });
        }
        self.check_table(words[3])?;
        self.attributes.insert(words[1].to_string(), words[3].to_string());
        Ok(())
    }

    // flag <keyword> <value> in <tablename>
    fn append_flag(&mut self, words: &[&str]) -> Result<(), ParseError> {
        if words.len() < 5 || words[3] != "in" {
            return Err(ParseError::MissingArgs {
                line: self.line,
                keyword: "flag",
                expected: "<keyword> <value> in <tablename>",
            });
        }
        let value = self.int(words[2])?;
        self.check_table(words[4])?;
        self.flags.insert(words[1].to_string(), (words[4].to_string(), value));
        Ok(())
    }

    // actionpoint <keyword> in <xtable|-> <ytable|->
    fn append_actionpoint(&mut self, words: &[&str]) -> Result<(), ParseError> {
        if words.len() < 5 || words[2] != "in" {
            return Err(ParseError::MissingArgs {
                line: self.line,
                keyword: "actionpoint",
                expected: "<keyword> in <xtable|-> <ytable|->",
            });
        }
        let table_arg = |name: &str| -> Result<Option<String>, ParseError> {
            if name == "-" {
                return Ok(None);
            }
            self.check_table(name)?;
            Ok(Some(name.to_string()))
        };
        let ap = ActionPoint {
            points: vec![None; self.doc.cels.len()],
            x_table: table_arg(words[3])?,
            y_table: table_arg(words[4])?,
        };
        self.ap_index.insert(words[1].to_string(), self.doc.actionpoints.len());
        self.doc.actionpoints.push((words[1].to_string(), ap));
        Ok(())
    }

    // frame <name> [<l> <t> <w> <h>]
    // frame <name> repeats <other> [<dx> <dy>]
    fn append_frame(&mut self, words: &[&str]) -> Result<(), ParseError> {
        let &name = words.get(1).ok_or(ParseError::MissingArgs {
            line: self.line,
            keyword: "frame",
            expected: "a name",
        })?;
        if let Some(prev) = self.doc.cel_index(name) {
            return Err(ParseError::DuplicateFrame {
                line: self.line,
                name: name.to_string(),
                prev: self.doc.cels[prev].line,
            });
        }

        let mut cel = Cel::new(name, self.line);
        if let Some(align) = self.pending_align.take() {
            cel.align = align;
        }

        let mut repeat = None;
        if words.get(2) == Some(&"repeats") {
            let (other, offset) = self.parse_repeats_args(&words[2..])?;
            let shift = |loc: Loc| Loc::new(loc.x + offset.x, loc.y + offset.y);
            let source = &self.doc.cels[other];
            cel.rect = source.rect.map(|r| Rect {
                left: r.left + offset.x,
                top: r.top + offset.y,
                ..r
            });
            cel.hotspot = source.hotspot.map(shift);
            repeat = Some((other, offset));
        } else if words.len() >= 6 {
            cel.rect = Some(Rect::new(
                self.int(words[2])?,
                self.int(words[3])?,
                self.int(words[4])?,
                self.int(words[5])?,
            ));
        }

        let index = self.doc.push_cel(cel);
        self.cur = Some(index);
        for table in &mut self.doc.tables {
            table.values.push(0);
        }
        for (_, ap) in &mut self.doc.actionpoints {
            ap.points.push(None);
        }
        if let Some((other, offset)) = repeat {
            self.copy_strips(other, offset);
        }
        Ok(())
    }

    /// Parse `repeats <other> [<dx> <dy>]` starting at the `repeats` token.
    fn parse_repeats_args(&self, words: &[&str]) -> Result<(usize, Loc), ParseError> {
        let &name = words.get(1).ok_or(ParseError::MissingArgs {
            line: self.line,
            keyword: "repeats",
            expected: "a frame name",
        })?;
        let other = self.doc.cel_index(name).ok_or_else(|| ParseError::RepeatsUndefined {
            line: self.line,
            name: name.to_string(),
        })?;
        let offset = match words.len() {
            2 => Loc::new(0, 0),
            4 => Loc::new(self.int(words[2])?, self.int(words[3])?),
            _ => {
                return Err(ParseError::MissingArgs {
                    line: self.line,
                    keyword: "repeats",
                    expected: "a frame name and optionally <dx> <dy>",
                })
            }
        };
        Ok((other, offset))
    }

    /// Copy `other`'s strips into the current cel, shifted by `offset`.
    /// A zero offset means the two cels share tiles, so keep them related.
    fn copy_strips(&mut self, other: usize, offset: Loc) {
        let cur = self.cur.expect("copy_strips called outside a frame");
        let copied: Vec<Strip> = self.doc.cels[other]
            .strips
            .iter()
            .map(|s| Strip {
                palette: s.palette,
                rect: Rect {
                    left: s.rect.left + offset.x,
                    top: s.rect.top + offset.y,
                    ..s.rect
                },
                dest: s.dest.map(|d| Loc::new(d.x + offset.x, d.y + offset.y)),
            })
            .collect();
        self.doc.cels[cur].strips.extend(copied);
        if offset.x == 0 && offset.y == 0 {
            self.doc.related.push((other, cur));
        }
    }

    fn append_aka(&mut self, words: &[&str]) -> Result<(), ParseError> {
        let cur = self.current("aka")?;
        let &name = words.get(1).ok_or(ParseError::MissingArgs {
            line: self.line,
            keyword: "aka",
            expected: "an alias",
        })?;
        self.doc.aliases.push((name.to_string(), cur));
        Ok(())
    }

    // strip <pal>(,<pal>)* [<l> <t> <w> <h>] [at <x> <y>]
    fn append_strip(&mut self, words: &[&str]) -> Result<(), ParseError> {
        let cur = self.current("strip")?;
        let &pal_tok = words.get(1).ok_or(ParseError::MissingArgs {
            line: self.line,
            keyword: "strip",
            expected: "a palette list",
        })?;
        let mut palettes = Vec::new();
        for p in pal_tok.split(',') {
            palettes.push(self.palette_id(p)?);
        }

        let cel_name = self.doc.cels[cur].name.clone();
        let (rect, dest) = if words.len() >= 6 {
            let rect = Rect::new(
                self.int(words[2])?,
                self.int(words[3])?,
                self.int(words[4])?,
                self.int(words[5])?,
            );
            let dest = match words.get(6) {
                Some(&"at") => {
                    if words.len() < 9 {
                        return Err(ParseError::MissingArgs {
                            line: self.line,
                            keyword: "strip",
                            expected: "<x> <y> after 'at'",
                        });
                    }
                    Some(Loc::new(self.int(words[7])?, self.int(words[8])?))
                }
                _ => None,
            };
            (rect, dest)
        } else {
            let rect = self.doc.cels[cur]
                .rect
                .ok_or_else(|| ParseError::NoClipRect { line: self.line, cel: cel_name.clone() })?;
            (rect, None)
        };
        if rect.width <= 0 || rect.height <= 0 {
            return Err(ParseError::BadStripSize { line: self.line, cel: cel_name });
        }

        let strips = &mut self.doc.cels[cur].strips;
        strips.extend(palettes.into_iter().map(|palette| Strip { palette, rect, dest }));
        Ok(())
    }

    fn append_hotspot(&mut self, words: &[&str]) -> Result<(), ParseError> {
        let cur = self.current("hotspot")?;
        if words.len() < 3 {
            return Err(ParseError::MissingArgs {
                line: self.line,
                keyword: "hotspot",
                expected: "<x> <y>",
            });
        }
        let loc = Loc::new(self.int(words[1])?, self.int(words[2])?);
        self.doc.cels[cur].hotspot = Some(loc);
        Ok(())
    }

    fn append_repeats(&mut self, words: &[&str]) -> Result<(), ParseError> {
        self.current("repeats")?;
        let (other, offset) = self.parse_repeats_args(words)?;
        self.copy_strips(other, offset);
        Ok(())
    }

    // related <name>...
    // Related frames are kept in the same bank: frames known to share
    // many tiles, or particles spawned alongside a frame.
    fn append_related(&mut self, words: &[&str]) -> Result<(), ParseError> {
        let cur = self.current("related")?;
        if words.len() < 2 {
            return Err(ParseError::MissingArgs {
                line: self.line,
                keyword: "related",
                expected: "at least one frame name",
            });
        }
        for name in &words[1..] {
            self.related_names.push((self.line, name.to_string(), cur));
        }
        Ok(())
    }

    fn append_subset(&mut self, _words: &[&str]) -> Result<(), ParseError> {
        let cur = self.current("subset")?;
        self.doc.cels[cur].subset = true;
        Ok(())
    }

    /// Lines starting with a keyword registered by `attribute`, `flag`, or
    /// `actionpoint` are per-cel table entries.
    fn append_user_keyword(&mut self, words: &[&str]) -> Result<(), ParseError> {
        let word = words[0].to_string();
        if let Some(table) = self.attributes.get(&word).cloned() {
            let cur = self.current(&word)?;
            let &tok = words.get(1).ok_or(ParseError::MissingArgs {
                line: self.line,
                keyword: "attribute keyword",
                expected: "a value",
            })?;
            let value = self.int(tok)?;
            self.doc.table_mut(&table).expect("attribute table checked at declaration").values
                [cur] = value;
            return Ok(());
        }
        if self.flags.contains_key(&word) {
            let cur = self.current(&word)?;
            // Several flags may share a line.
            for tok in words {
                let (table, value) =
                    self.flags.get(*tok).ok_or_else(|| ParseError::UnknownKeyword {
                        line: self.line,
                        word: tok.to_string(),
                    })?;
                let table = table.clone();
                self.doc.table_mut(&table).expect("flag table checked at declaration").values
                    [cur] |= *value;
            }
            return Ok(());
        }
        if let Some(&ap) = self.ap_index.get(&word) {
            let cur = self.current(&word)?;
            if words.len() < 3 {
                return Err(ParseError::MissingArgs {
                    line: self.line,
                    keyword: "actionpoint keyword",
                    expected: "<x> <y>",
                });
            }
            let loc = Loc::new(self.int(words[1])?, self.int(words[2])?);
            self.doc.actionpoints[ap].1.points[cur] = Some(loc);
            return Ok(());
        }
        Err(ParseError::UnknownKeyword { line: self.line, word })
    }

    /// Validate deferred references and fill in defaults.
    fn finish(mut self) -> Result<SheetDoc, ParseError> {
        for i in 0..self.doc.cels.len() {
            let cel = &self.doc.cels[i];
            if cel.strips.is_empty() && cel.rect.is_none() {
                return Err(ParseError::EmptyFrame { name: cel.name.clone(), line: cel.line });
            }
            for strip in &cel.strips {
                if !self.doc.palettes.contains_key(&strip.palette) {
                    return Err(ParseError::UndeclaredPalette {
                        cel: cel.name.clone(),
                        palette: strip.palette,
                    });
                }
            }
            // Bounding box from the union of strip destinations.
            let rect = match cel.rect {
                Some(r) => r,
                None => {
                    let mut bounds: Option<Rect> = None;
                    for strip in &cel.strips {
                        let dst = match strip.dest {
                            Some(d) => Rect::new(d.x, d.y, strip.rect.width, strip.rect.height),
                            None => strip.rect,
                        };
                        bounds = Some(match bounds {
                            Some(b) => b.union(&dst),
                            None => dst,
                        });
                    }
                    bounds.expect("cel without strips rejected above")
                }
            };
            let cel = &mut self.doc.cels[i];
            cel.rect = Some(rect);
            // The hotspot defaults to bottom center.
            if cel.hotspot.is_none() {
                cel.hotspot = Some(Loc::new(rect.left + rect.width.div_euclid(2), rect.bottom()));
            }
        }

        for (_, other, cur) in std::mem::take(&mut self.related_names) {
            let cel = &self.doc.cels[cur];
            let other = self.doc.cel_index(&other).ok_or_else(|| ParseError::UnknownRelated {
                cel: cel.name.clone(),
                name: other.clone(),
            })?;
            self.doc.related.push((other, cur));
        }

        self.write_actionpoint_tables();
        Ok(self.doc)
    }

    /// Action points are authored in sheet coordinates but stored relative
    /// to each cel's hotspot. On a mirrored sheet the X offset negates.
    fn write_actionpoint_tables(&mut self) {
        let hflipped = self.doc.hflipped;
        let hotspots: Vec<Loc> = self
            .doc
            .cels
            .iter()
            .map(|c| c.hotspot.expect("hotspots defaulted in finish"))
            .collect();
        let aps = self.doc.actionpoints.clone();
        for (_, ap) in &aps {
            let mut xs = Vec::with_capacity(hotspots.len());
            let mut ys = Vec::with_capacity(hotspots.len());
            for (hot, point) in hotspots.iter().zip(&ap.points) {
                match point {
                    Some(p) => {
                        let dx = if hflipped { hot.x - p.x } else { p.x - hot.x };
                        xs.push(dx);
                        ys.push(p.y - hot.y);
                    }
                    None => {
                        xs.push(ACTION_POINT_UNSET);
                        ys.push(ACTION_POINT_UNSET);
                    }
                }
            }
            if let Some(name) = &ap.x_table {
                self.doc.table_mut(name).expect("actionpoint table checked at declaration").values =
                    xs;
            }
            if let Some(name) = &ap.y_table {
                self.doc.table_mut(name).expect("actionpoint table checked at declaration").values =
                    ys;
            }
        }
    }
}
