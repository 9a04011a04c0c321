//! Command-line interface implementation

use std::fs;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use crate::debugimg;
use crate::parser::parse_reader;
use crate::pipeline::{assemble, Artifacts, Options, PipelineError};

const EXIT_SUCCESS: u8 = 0;
const EXIT_ERROR: u8 = 1;

/// Convert a sprite sheet into banked 8x16 tile data and metasprite maps
#[derive(Parser)]
#[command(name = "celpack")]
#[command(about = "Convert a sprite sheet and cel-position file into banked CHR tiles and metasprite tables")]
#[command(version)]
pub struct Cli {
    /// Cel-position file describing the frames on the sprite sheet
    #[arg(value_name = "STRIPSFILE")]
    pub strips_file: PathBuf,

    /// Image containing all cels
    #[arg(value_name = "CELIMAGE")]
    pub cel_image: PathBuf,

    /// File to which CHR tile data is written
    #[arg(value_name = "CHRFILE")]
    pub chr_file: Option<PathBuf>,

    /// File to which metasprite assembly is written ('-' for stdout)
    #[arg(value_name = "ASMFILE")]
    pub asm_file: Option<PathBuf>,

    /// Image containing all cels with emblems pre-flipped for left facing
    #[arg(long, value_name = "PATH")]
    pub flip: Option<PathBuf>,

    /// Write frame numbers in FRAME_xxx=nnn format
    #[arg(long, value_name = "FRAMENUMFILE")]
    pub write_frame_numbers: Option<PathBuf>,

    /// Prefix of the frametobank, mspraddrs, NUMFRAMES and NUMTILES symbols
    #[arg(long, default_value = "")]
    pub prefix: String,

    /// ca65 segment in which to put metasprite maps
    #[arg(long, default_value = "RODATA")]
    pub segment: String,

    /// Tiles per bank
    #[arg(long, default_value_t = 32, value_parser = clap::value_parser!(u64).range(1..=256))]
    pub bank_size: u64,

    /// Write intermediate images and packing statistics
    #[arg(short = 'd', long)]
    pub intermediate: bool,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    match convert(&cli) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Run one conversion as described by the parsed command line.
pub fn convert(cli: &Cli) -> Result<(), PipelineError> {
    let doc = parse_reader(BufReader::new(fs::File::open(&cli.strips_file)?))?;
    let sheet = image::open(&cli.cel_image)?.to_rgba8();
    let flip_sheet = match &cli.flip {
        Some(path) => Some(image::open(path)?.to_rgba8()),
        None => None,
    };

    let options = Options {
        bank_size: cli.bank_size as usize,
        prefix: cli.prefix.clone(),
        segment: cli.segment.clone(),
        strips_file: cli.strips_file.display().to_string(),
        image_file: cli.cel_image.display().to_string(),
        flip_file: cli.flip.as_ref().map(|p| p.display().to_string()),
    };
    let artifacts = assemble(doc, sheet, flip_sheet, &options)?;

    if cli.intermediate {
        write_intermediate(cli, &artifacts)?;
    }
    if let Some(path) = &cli.chr_file {
        fs::write(path, &artifacts.chr)?;
    }
    if let Some(path) = &cli.asm_file {
        if path.as_os_str() == "-" {
            std::io::stdout().write_all(artifacts.asm.as_bytes())?;
        } else {
            fs::write(path, &artifacts.asm)?;
        }
    }
    if let Some(path) = &cli.write_frame_numbers {
        fs::write(path, &artifacts.frame_numbers)?;
    }
    Ok(())
}

/// Debug images land next to the working directory, named after the sheet.
fn write_intermediate(cli: &Cli, artifacts: &Artifacts) -> Result<(), PipelineError> {
    let stem = cli
        .cel_image
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("celimage")
        .to_string();
    debugimg::print_stats(&artifacts.doc, &artifacts.packing, artifacts.interner.len());
    let boxing = debugimg::boxing_image(&artifacts.doc, &artifacts.sheet);
    boxing.save(Path::new(&format!("{stem}-boxing.png")))?;
    let tiles = debugimg::tile_sheet_image(
        &artifacts.packing,
        &artifacts.interner,
        cli.bank_size as usize,
    );
    tiles.save(Path::new(&format!("{stem}-uniquetiles.png")))?;
    Ok(())
}
