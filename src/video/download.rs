use super::{Error, Result};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPair {
    pub video_url: String,
    pub audio_url: String,
}

#[derive(ToSchema, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFiles {
    #[schema(value_type = String)]
    pub video_file: PathBuf,
    #[schema(value_type = String)]
    pub audio_file: PathBuf,
}

fn base_url(stream: &Value) -> Option<String> {
    stream
        .get("baseUrl")
        .or_else(|| stream.get("base_url"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

/// Pick the DASH video stream whose `id` equals `quality` (falling back to the
/// first listed) and the first audio stream.
#[must_use]
pub fn select_streams(play: &Value, quality: i64) -> Option<StreamPair> {
    let videos = play.pointer("/dash/video").and_then(Value::as_array)?;
    let audios = play.pointer("/dash/audio").and_then(Value::as_array)?;

    let video_url = videos
        .iter()
        .find(|video| video.get("id").and_then(Value::as_i64) == Some(quality))
        .and_then(base_url)
        .or_else(|| videos.first().and_then(base_url))?;
    let audio_url = audios.first().and_then(base_url)?;

    Some(StreamPair {
        video_url,
        audio_url,
    })
}

pub(super) async fn save(
    client: &Client,
    dir: &Path,
    bvid: &str,
    streams: &StreamPair,
) -> Result<DownloadedFiles> {
    fs::create_dir_all(dir).await.map_err(|source| Error::Write {
        path: dir.to_path_buf(),
        source,
    })?;

    let files = DownloadedFiles {
        video_file: dir.join(format!("{bvid}.mp4")),
        audio_file: dir.join(format!("{bvid}.mp3")),
    };

    fetch_to(client, &streams.video_url, &files.video_file).await?;
    fetch_to(client, &streams.audio_url, &files.audio_file).await?;

    info!(video = %files.video_file.display(), audio = %files.audio_file.display(), "download complete");

    Ok(files)
}

// The final name only ever holds a complete stream; bytes land in `<target>.part` first.
async fn fetch_to(client: &Client, url: &str, target: &Path) -> Result<()> {
    let mut response = client.get(url).send().await?;
    if response.status() != StatusCode::OK {
        return Err(Error::FetchStatus(response.status()));
    }

    let mut partial = target.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);
    let write_err = |source| Error::Write {
        path: partial.clone(),
        source,
    };

    let mut file = File::create(&partial).await.map_err(write_err)?;
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await.map_err(write_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_err)?;
    drop(file);

    fs::rename(&partial, target)
        .await
        .map_err(|source| Error::Write {
            path: target.to_path_buf(),
            source,
        })?;

    debug!(bytes = written, path = %target.display(), "stream saved");
    Ok(())
}
