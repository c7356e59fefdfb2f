use anyhow::Result;
use clap::Parser;
use gen_image::{Bank, BlockDesc, ImageWriter, ImageWriterConfig, PointerDesc, sample};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gen-image")]
struct Args {
    /// Output directory for generated artifacts
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Size of the internal image (default: the sample layout)
    #[arg(long, value_parser = parse_size)]
    internal_len: Option<usize>,
    /// Size of the external image (default: the sample layout)
    #[arg(long, value_parser = parse_size)]
    external_len: Option<usize>,
    /// Number of internal pointers to scatter over external flash instead of
    /// writing the sample layout
    #[arg(short, long)]
    pointers: Option<usize>,
}

fn parse_size(text: &str) -> Result<usize, String> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(&hex.replace('_', ""), 16),
        None => text.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid size `{text}`: {e}"))
}

/// An internal image whose second half is a pointer table spread evenly
/// over a patterned external image.
fn scattered(internal_len: usize, external_len: usize, pointers: usize) -> ImageWriter {
    let mut writer = ImageWriter::new(ImageWriterConfig {
        internal_len,
        external_len,
        ..Default::default()
    });
    writer.block(BlockDesc::pattern("data", Bank::External, 0, external_len, 9));
    let table = internal_len / 2;
    let slots = (internal_len - table) / 4;
    let stride = (external_len / pointers.max(1)).max(1);
    for i in 0..pointers.min(slots) {
        writer.pointer(PointerDesc::to_external(table + i * 4, i * stride));
    }
    writer
}

fn main() -> Result<()> {
    let args = Args::parse();
    let output = match args.output {
        Some(p) => p,
        None => {
            let mut cwd = std::env::current_dir()?;
            cwd.push("out");
            cwd
        }
    };

    let writer = match args.pointers {
        Some(pointers) => scattered(
            args.internal_len.unwrap_or(sample::INTERNAL_LEN),
            args.external_len.unwrap_or(sample::EXTERNAL_LEN),
            pointers,
        ),
        None => sample::writer(),
    };
    let images = writer.write_files(&output)?;

    println!(
        "out: {}\ninternal: {} bytes\nexternal: {} bytes",
        output.display(),
        images.internal.len(),
        images.external.len()
    );
    print!("{}", images.manifest);

    Ok(())
}
