//! youtube-fetch - download one YouTube video at a chosen quality

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use eyre::{bail, Context, OptionExt, Result};
use tracing_subscriber::EnvFilter;
use youtube_fetch_lib::{
    DownloadHooks, DownloadOptions, Downloader, EncodingDescriptor, NetworkConfig,
};

#[derive(Debug, Parser)]
#[command(name = "youtube-fetch", version, about)]
struct Cli {
    /// Video URL
    url: String,

    /// Quality label to download, e.g. 1080p
    #[arg(short, long)]
    quality: Option<String>,

    /// Output file stem, defaults to a timestamped name
    #[arg(short, long)]
    output: Option<String>,

    /// Save into the user's download directory instead of the current one
    #[arg(long)]
    downloads: bool,

    /// Print available qualities and exit
    #[arg(long)]
    list: bool,

    /// Proxy URL (http, https or socks5)
    #[arg(long)]
    proxy: Option<String>,

    /// Network timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let network = NetworkConfig {
        proxy: cli.proxy.clone(),
        timeout: Some(cli.timeout),
    };

    let output_dir = if cli.downloads {
        dirs::download_dir().ok_or_eyre("no download directory for this user")?
    } else {
        PathBuf::from(".")
    };
    let options = DownloadOptions::default()
        .with_output_dir(output_dir)
        .with_output_name(cli.output.clone());

    let downloader = Downloader::with_system_tools(network)?.with_options(options);

    let quality = match cli.quality {
        Some(q) if !cli.list => q,
        _ => {
            let summary = downloader.get_video_summary(&cli.url).await?;
            if cli.list {
                print_resolutions(&summary.resolutions);
                return Ok(());
            }
            println!("{}", summary.title);
            print_resolutions(&summary.resolutions);
            prompt_choice(&summary.resolutions)?
        }
    };

    if !downloader.muxer().is_available().await {
        bail!("ffmpeg not found");
    }

    let outcome = downloader
        .download(&cli.url, &quality, &progress_hooks())
        .await?;

    println!("{}", outcome.output.display());
    Ok(())
}

fn print_resolutions(resolutions: &[EncodingDescriptor]) {
    for (i, r) in resolutions.iter().enumerate() {
        let fps = r
            .frame_rate
            .map(|f| format!(" ({}fps)", f))
            .unwrap_or_default();
        let audio = if r.has_audio { "with audio" } else { "video only" };
        println!("{}. {}{} {}", i + 1, r.quality_label, fps, audio);
    }
}

fn prompt_choice(resolutions: &[EncodingDescriptor]) -> Result<String> {
    print!("Select quality [1-{}]: ", resolutions.len());
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .wrap_err("failed to read selection")?;

    let choice: usize = line
        .trim()
        .parse()
        .wrap_err_with(|| format!("not a number: {:?}", line.trim()))?;

    choice
        .checked_sub(1)
        .and_then(|i| resolutions.get(i))
        .map(|r| r.quality_label.clone())
        .ok_or_eyre("selection out of range")
}

fn progress_hooks() -> DownloadHooks {
    DownloadHooks::default()
        .on_start(|| eprintln!("downloading..."))
        .on_video_progress(|p| match p.fraction() {
            Some(f) => eprintln!("video: {:.1}%", f * 100.0),
            None => eprintln!("video: {} bytes", p.downloaded_bytes),
        })
        .on_audio_progress(|p| match p.fraction() {
            Some(f) => eprintln!("audio: {:.1}%", f * 100.0),
            None => eprintln!("audio: {} bytes", p.downloaded_bytes),
        })
        .on_merge_progress(|p| match p.fraction() {
            Some(f) => eprintln!("merging: {:.1}% ({})", f * 100.0, p.elapsed_timemark),
            None => eprintln!("merging: {}", p.elapsed_timemark),
        })
        .on_end(|| eprintln!("done"))
}
