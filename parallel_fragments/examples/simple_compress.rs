use anyhow::{bail, Context, Result};
use parallel_fragments::{hash_file, Pipeline, PipelineConfig};
use std::env;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <input> [output]", args[0]);
        return Ok(());
    }

    let input = &args[1];
    let packed = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| format!("{input}.frag"));
    let restored = format!("{packed}.check");

    let pipeline = Pipeline::new(PipelineConfig::default());
    let stats = pipeline
        .compress_file(input, &packed)
        .context("Failed to compress")?;
    println!(
        "{} blocks, {} -> {} bytes",
        stats.blocks, stats.bytes_in, stats.bytes_out
    );

    pipeline
        .decompress_file(&packed, &restored)
        .context("Failed to decompress")?;
    let same = hash_file(input)? == hash_file(&restored)?;
    std::fs::remove_file(&restored)?;
    if !same {
        bail!("round trip of {input} does not match");
    }
    println!("round trip verified");
    Ok(())
}
