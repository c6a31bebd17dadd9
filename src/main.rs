use clap::{Parser, Subcommand};
use h4mk::config::EngineConfig;
use h4mk::container::{read, Block, BuildOptions};
use h4mk::sealing::{attest, get_engine};
use h4mk::track::{BlockType, Track, TrackTable};
use serde_json::Map as JsonMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "h4mk", version = "1.0.0", about = "The H4MK media container CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble an H4MK file from a manifest of track block dumps
    Build {
        /// JSON manifest: [{track_id, pts_ms, block_type: "i"|"p"|"b", file}]
        #[arg(short, long)]
        manifest: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Path to a dynamic compression core; the reference engine if unset
        #[arg(long)]
        core: Option<PathBuf>,
    },
    /// Print FileHeader, track table, chunk list, and VERI status
    Inspect {
        input: PathBuf,
    },
    /// Run a keyframe seek query and print the resulting decode chain
    Seek {
        input: PathBuf,
        #[arg(short, long)]
        track: u16,
        #[arg(short, long)]
        pts_ms: u32,
    },
    /// Run full read-path validation and report the first failing invariant
    Verify {
        input: PathBuf,
    },
    /// Print the active compression engine's attestation record
    Attest {
        /// Path to a dynamic compression core; the reference engine if unset
        #[arg(long)]
        core: Option<PathBuf>,
        #[arg(long)]
        timestamp_unix: u64,
    },
}

#[derive(serde::Deserialize)]
struct ManifestEntry {
    track_id: u16,
    pts_ms: u32,
    block_type: String,
    file: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        // ── Build ────────────────────────────────────────────────────────
        Commands::Build { manifest, output, core } => {
            let manifest_bytes = std::fs::read(&manifest)?;
            let entries: Vec<ManifestEntry> = serde_json::from_slice(&manifest_bytes)?;

            let mut track_ids: Vec<u16> = entries.iter().map(|e| e.track_id).collect();
            track_ids.sort_unstable();
            track_ids.dedup();
            let tracks = TrackTable {
                tracks: track_ids
                    .into_iter()
                    .map(|track_id| Track {
                        track_id,
                        name: format!("track-{track_id}"),
                        kind: "data".to_string(),
                        codec: "opaque".to_string(),
                        sample_rate: None,
                        channels: None,
                        note: None,
                        extra: JsonMap::new(),
                    })
                    .collect(),
            };

            let mut blocks = Vec::with_capacity(entries.len());
            for e in &entries {
                let block_type = parse_block_type(&e.block_type)?;
                let payload = std::fs::read(&e.file)?;
                blocks.push(Block { track_id: e.track_id, pts_ms: e.pts_ms, block_type, payload });
            }

            let engine_cfg = EngineConfig { core_path: core, ..EngineConfig::default() };
            let engine = get_engine(&engine_cfg)?;
            let bytes = h4mk::container::build(&tracks, &blocks, &engine, None, &BuildOptions::default())?;
            std::fs::write(&output, &bytes)?;
            println!("Built: {} ({} B, {} blocks, {} tracks)", output.display(), bytes.len(), blocks.len(), tracks.tracks.len());
        }

        // ── Inspect ──────────────────────────────────────────────────────
        Commands::Inspect { input } => {
            let bytes = std::fs::read(&input)?;
            let reader = read(&bytes)?;
            println!("── H4MK file ─────────────────────────────────────────────");
            println!("  Path            {}", input.display());
            println!("  Format version  {}", reader.header.version);
            println!("  Timestamp (ms)  {}", reader.header.timestamp_ms);
            println!("  VERI sha256     {}", reader.veri_sha256_hex());
            println!("  Tracks          {}", reader.tracks().tracks.len());
            for t in &reader.tracks().tracks {
                println!("    id={:<5} name={:<16} kind={:<10} codec={}", t.track_id, t.name, t.kind, t.codec);
            }
            let core_blocks: Vec<_> = reader.iter_core_blocks(None).collect();
            println!("  CORE blocks     {}", core_blocks.len());
            for b in &core_blocks {
                println!(
                    "    [{:4}] track={:<5} pts_ms={:<10} type={:?}",
                    b.core_chunk_index, b.track_id, b.pts_ms, b.block_type
                );
            }
        }

        // ── Seek ─────────────────────────────────────────────────────────
        Commands::Seek { input, track, pts_ms } => {
            let bytes = std::fs::read(&input)?;
            let reader = read(&bytes)?;
            match reader.seek(track, pts_ms) {
                Some((idx, keyframe_pts, core_chunk_index)) => {
                    println!("Keyframe: entry #{idx}, pts_ms={keyframe_pts}, core_chunk_index={core_chunk_index}");
                    let chain = reader.decode_chain(track, pts_ms);
                    println!("Decode chain: {chain:?}");
                }
                None => println!("No keyframe at or before pts_ms={pts_ms} on track {track}"),
            }
        }

        // ── Verify ───────────────────────────────────────────────────────
        Commands::Verify { input } => {
            let bytes = std::fs::read(&input)?;
            match read(&bytes) {
                Ok(reader) => {
                    println!("OK: {} validates (VERI sha256 {})", input.display(), reader.veri_sha256_hex());
                }
                Err(e) => {
                    println!("FAIL: {} — {e}", input.display());
                    std::process::exit(1);
                }
            }
        }

        // ── Attest ───────────────────────────────────────────────────────
        Commands::Attest { core, timestamp_unix } => {
            let engine_cfg = EngineConfig { core_path: core, ..EngineConfig::default() };
            let engine = get_engine(&engine_cfg)?;
            let att = attest(&engine, timestamp_unix);
            println!("── Attestation ───────────────────────────────────────────");
            println!("  engine_id          {}", att.engine_id);
            println!("  fingerprint        {}", att.fingerprint);
            println!("  timestamp_unix     {}", att.timestamp_unix);
            println!("  sealed             {}", att.sealed);
            println!("  attestation_hash   {}", hex::encode(att.attestation_hash));
        }
    }

    Ok(())
}

fn parse_block_type(s: &str) -> Result<BlockType, String> {
    match s {
        "i" | "I" => Ok(BlockType::I),
        "p" | "P" => Ok(BlockType::P),
        "b" | "B" => Ok(BlockType::B),
        other => Err(format!("unknown block_type {other:?}, expected i/p/b")),
    }
}
