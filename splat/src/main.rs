use clap::{Parser, Subcommand};
use splat_lib::compression::{
    compress_scene, compress_scene_async, decompress_scene, decompress_scene_async, is_zstd,
    load_scene, ZstdOptions,
};
use splat_lib::{first_rewrite_difference, EncodedScene, GaussianStats, SplatError};
use std::error::Error;
use std::fs;
use std::process;
use std::time::Instant;

type CliResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(
    name = "Splat scene tool",
    version = "1.0",
    author = "Denis Avvakumov",
    about = "Inspects, verifies and compresses Gaussian splat scene files (PLY)"
)]
struct Cli {
    #[arg(
        long = "log-level",
        value_name = "FILTER",
        global = true,
        help = "Log filter, e.g. 'debug' or 'splat::ply=debug'. Overrides RUST_LOG."
    )]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print scene metadata and per-field value ranges. Accepts .ply or .ply.zst.
    Inspect {
        #[arg(short = 'i', long = "input", value_name = "INPUT")]
        input: String,
    },
    /// Parse a .ply scene, serialize it again and compare the bytes.
    Verify {
        #[arg(short = 'i', long = "input", value_name = "INPUT")]
        input: String,
    },
    /// Validate a .ply scene and write it as .ply.zst.
    Compress {
        #[arg(short = 'i', long = "input", value_name = "INPUT")]
        input: String,

        #[arg(short = 'o', long = "output", value_name = "OUTPUT")]
        output: String,

        #[arg(
            short = 'c',
            long = "compression-level",
            value_name = "LEVEL",
            default_value = "3",
            help = "Set the compression level."
        )]
        compression_level: u32,

        #[arg(
            short = 'w',
            long = "workers",
            value_name = "WORKERS",
            default_value = "3",
            help = "Set the workers count for ZSTD."
        )]
        workers: u32,

        #[arg(short = 'a', long = "async", help = "Use the asynchronous encoder.")]
        async_mode: bool,
    },
    /// Unwrap a .ply.zst scene into a validated .ply.
    Decompress {
        #[arg(short = 'i', long = "input", value_name = "INPUT")]
        input: String,

        #[arg(short = 'o', long = "output", value_name = "OUTPUT")]
        output: String,

        #[arg(short = 'a', long = "async", help = "Use the asynchronous decoder.")]
        async_mode: bool,
    },
}

fn init_logger(level: Option<&str>) {
    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stderr);
    builder.filter_level(log::LevelFilter::Info);
    builder.parse_default_env();
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    builder.init();
}

fn read_input(path: &str) -> CliResult<Vec<u8>> {
    fs::read(path).map_err(|e| format!("Error reading input file {}: {}", path, e).into())
}

fn inspect(input: &str) -> CliResult<()> {
    let raw_data = read_input(input)?;
    let scene = load_scene(&raw_data)?;
    let gaussians = scene.decode()?;
    let metadata = scene.metadata;

    let framing = if is_zstd(&raw_data) { "zstd" } else { "plain" };
    println!("File: {} ({} bytes, {})", input, raw_data.len(), framing);
    println!(
        "Format version: {}.{}.{} | Color space: {:?}",
        metadata.version.major, metadata.version.minor, metadata.version.patch, metadata.color_space
    );
    println!(
        "Image: {}x{} | Focal length: {:.2}px | Principal point: ({:.1}, {:.1})",
        metadata.image_size.width,
        metadata.image_size.height,
        metadata.intrinsics.fx,
        metadata.intrinsics.cx,
        metadata.intrinsics.cy
    );
    println!(
        "Disparity p10/p90: {:.4} / {:.4}",
        metadata.disparity_range.p10, metadata.disparity_range.p90
    );

    match GaussianStats::from_gaussians(&gaussians) {
        Some(stats) => {
            println!("Gaussians: {}", stats.count);
            for (name, range) in [
                ("mean", stats.mean),
                ("scale", stats.scale),
                ("f_dc", stats.color),
                ("opacity", stats.opacity),
            ] {
                println!("  {:<8} [{:.4}, {:.4}]", name, range.min, range.max);
            }
        }
        None => println!("Gaussians: 0"),
    }

    Ok(())
}

fn verify(input: &str) -> CliResult<bool> {
    let raw_data = read_input(input)?;
    if is_zstd(&raw_data) {
        return Err(format!("{} is zstd-framed, run 'decompress' first", input).into());
    }
    let start = Instant::now();
    let difference = first_rewrite_difference(&raw_data)?;
    let elapsed = start.elapsed().as_millis();

    match difference {
        None => println!(
            "{}: rewrite is byte-identical, {} bytes ({} ms)",
            input,
            raw_data.len(),
            elapsed
        ),
        Some(at) => println!("{}: rewrite differs at byte {} ({} ms)", input, at, elapsed),
    }
    Ok(difference.is_none())
}

async fn transcode_async(
    raw_data: &[u8],
    options: Option<ZstdOptions>,
) -> Result<(Vec<u8>, usize), SplatError> {
    match options {
        Some(options) => {
            let scene = EncodedScene::parse(raw_data)?;
            Ok((compress_scene_async(&scene, options).await?, scene.len()))
        }
        None => {
            let scene = decompress_scene_async(raw_data).await?;
            Ok((scene.to_bytes()?, scene.len()))
        }
    }
}

fn transcode(
    input: &str,
    output: &str,
    async_mode: bool,
    options: Option<ZstdOptions>,
) -> CliResult<()> {
    let raw_data = read_input(input)?;

    let mode = if async_mode {
        "Asynchronous"
    } else {
        "Synchronous"
    };
    let op = if options.is_some() {
        "Compression"
    } else {
        "Decompression"
    };
    print!("Mode: {} {}\nInput: {} | Output: {}", mode, op, input, output);
    match options {
        Some(options) => println!(" | Level: {}", options.level),
        None => println!(),
    }

    let start = Instant::now();

    let (result, count) = if async_mode {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        rt.block_on(transcode_async(&raw_data, options))?
    } else {
        match options {
            Some(options) => {
                let scene = EncodedScene::parse(&raw_data)?;
                (compress_scene(&scene, options)?, scene.len())
            }
            None => {
                let scene = decompress_scene(&raw_data)?;
                (scene.to_bytes()?, scene.len())
            }
        }
    };

    let elapsed = start.elapsed().as_millis();
    println!("{} Time: {} ms | Gaussians: {}", op, elapsed, count);

    fs::write(output, &result)
        .map_err(|e| format!("Error writing output '{}': {}", output, e))?;
    println!("Successfully wrote to '{}'.", output);

    Ok(())
}

fn run(cli: Cli) -> CliResult<()> {
    match cli.command {
        Command::Inspect { input } => inspect(&input),
        Command::Verify { input } => {
            if verify(&input)? {
                Ok(())
            } else {
                Err("round trip is not byte-identical".into())
            }
        }
        Command::Compress {
            input,
            output,
            compression_level,
            workers,
            async_mode,
        } => {
            let options = ZstdOptions {
                level: compression_level,
                workers,
            };
            transcode(&input, &output, async_mode, Some(options))
        }
        Command::Decompress {
            input,
            output,
            async_mode,
        } => transcode(&input, &output, async_mode, None),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.log_level.as_deref());

    if let Err(e) = run(cli) {
        log::error!("{}", e);
        process::exit(1);
    }
}
