use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use teloxide::types::{ChatId, MessageId};

use crate::core::error::AppResult;
use crate::download::reporter::{ProgressPipeline, ReporterConfig};
use crate::download::session::SessionDir;
use crate::download::source::{AcquireRequest, Acquirer};
use crate::telegram::status::{StatusSink, Tone};

#[derive(Parser)]
#[command(name = "linkdrop")]
#[command(author, version, about = "Telegram bot that downloads media from links and sends the files back", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot (default)
    Run,

    /// Download a link once into a local directory
    Fetch {
        /// Link to download
        url: String,

        /// Cap the video height, e.g. 720
        #[arg(long)]
        max_height: Option<u32>,

        /// Playlist item selector, e.g. "3"
        #[arg(long)]
        playlist_items: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Prints status texts to the terminal instead of editing a chat message.
pub struct ConsoleStatus;

#[async_trait]
impl StatusSink for ConsoleStatus {
    async fn render(&self, _chat_id: ChatId, _message_id: MessageId, text: &str, _tone: Tone) -> AppResult<()> {
        println!("{}", text);
        Ok(())
    }
}

/// Runs one acquisition with terminal progress and returns the produced files.
///
/// Files land in a fresh session directory under `output`, so media already
/// present there is never reported as produced. The directory is kept.
pub async fn fetch(
    acquirer: Arc<dyn Acquirer>,
    url: String,
    max_height: Option<u32>,
    playlist_items: Option<String>,
    output: &Path,
    reporter: ReporterConfig,
) -> anyhow::Result<Vec<PathBuf>> {
    let session = SessionDir::create(output).await?;

    let request = AcquireRequest {
        urls: vec![url],
        output_dir: session.path().to_path_buf(),
        max_height,
        playlist_items,
    };

    let (sender, pipeline) = ProgressPipeline::start(Arc::new(ConsoleStatus), ChatId(0), MessageId(0), reporter);
    let acquired = tokio::task::spawn_blocking(move || {
        acquirer.check_ready()?;
        acquirer.acquire(&request, &sender)
    })
    .await;
    pipeline.stop().await;

    Ok(acquired??)
}
