use anyhow::{anyhow, Context, Result};
use clap::Parser;
use danmaku_etl::adapters::BiliClient;
use danmaku_etl::utils::logger;
use danmaku_etl::EtlConfig;

/// 單支影片的字幕探測：確認 cookie 與字幕介面是否可用
#[derive(Parser)]
#[command(name = "probe_subtitle")]
#[command(about = "Fetch one video's subtitles and print the first cues")]
struct Args {
    /// BV id to probe
    bvid: String,

    /// Path to TOML configuration file
    #[arg(short, long, default_value = "etl-config.toml")]
    config: String,

    /// Number of cues to print
    #[arg(short, long, default_value_t = 5)]
    lines: usize,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    let config = EtlConfig::from_file_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config))?;
    let client = BiliClient::new(&config.platform)?;

    println!("🔍 Probing {}", args.bvid);
    let cid = client
        .resolve_cid(&args.bvid)
        .await
        .with_context(|| format!("resolving cid for {}", args.bvid))?;
    println!("CID: {}", cid);

    let tracks = client.player_subtitles(&args.bvid, cid).await?;
    for track in &tracks {
        println!("  track: {} ({}) {}", track.lan, track.lan_doc, track.absolute_url());
    }
    let track = tracks
        .first()
        .ok_or_else(|| anyhow!("{} has no subtitles (a logged-in cookie may be required)", args.bvid))?;

    let cues = client.fetch_subtitle_body(track).await?;
    println!("✅ {} subtitle lines", cues.len());
    for cue in cues.iter().take(args.lines) {
        println!("[{:.1}s - {:.1}s] {}", cue.from, cue.to, cue.content);
    }

    Ok(())
}
