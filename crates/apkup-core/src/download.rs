use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use apkup_backend::{DownloadError, DownloadProgress};
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, HeaderMap, RANGE};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const PARTIAL_SUFFIX: &str = ".part";
const PARTIAL_URL_SUFFIX: &str = ".part.url";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub success: bool,
    pub error_message: Option<String>,
}

impl DownloadOutcome {
    fn succeeded() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    fn failed(error: &DownloadError) -> Self {
        Self {
            success: false,
            error_message: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Running(DownloadProgress),
    Finished(DownloadOutcome),
}

struct ActiveDownload {
    url: String,
    status: watch::Receiver<DownloadStatus>,
    task: JoinHandle<()>,
}

/// Runs downloads in background tasks that outlive whoever started them.
///
/// Transfers are registered under a caller chosen key so a later caller can
/// re-attach to a transfer that is still running, or collect the outcome of
/// one that finished while nobody was watching.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    active: Arc<Mutex<HashMap<String, ActiveDownload>>>,
    allow_insecure: bool,
}

impl Downloader {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            active: Arc::new(Mutex::new(HashMap::new())),
            allow_insecure: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn allowing_plain_http(mut self) -> Self {
        self.allow_insecure = true;
        self
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, ActiveDownload>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Download `url` to `dest` under `key`.
    ///
    /// A transfer of the same URL still running under `key` is joined; any
    /// other transfer under `key` is aborted first.
    pub fn start(&self, key: &str, url: &str, dest: &Path) -> DownloadHandle {
        let mut active = self.active();

        let previous = match active.remove(key) {
            Some(existing)
                if existing.url == url
                    && matches!(*existing.status.borrow(), DownloadStatus::Running(_)) =>
            {
                debug!("Joining running download of {url}");
                let handle = DownloadHandle {
                    status: existing.status.clone(),
                };
                active.insert(key.to_string(), existing);
                return handle;
            }
            Some(existing) => {
                existing.task.abort();
                Some(existing.task)
            }
            None => None,
        };

        let (sender, receiver) = watch::channel(DownloadStatus::Running(DownloadProgress::default()));
        let client = self.client.clone();
        let allow_insecure = self.allow_insecure;
        let task_url = url.to_string();
        let dest = dest.to_path_buf();

        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }

            let outcome = match transfer(&client, &task_url, &dest, &sender, allow_insecure).await
            {
                Ok(bytes) => {
                    info!("Downloaded {bytes} bytes to {}", dest.display());
                    DownloadOutcome::succeeded()
                }
                Err(error) => {
                    warn!("Download of {task_url} failed: {error}");
                    DownloadOutcome::failed(&error)
                }
            };
            sender.send_replace(DownloadStatus::Finished(outcome));
        });

        active.insert(
            key.to_string(),
            ActiveDownload {
                url: url.to_string(),
                status: receiver.clone(),
                task,
            },
        );
        DownloadHandle { status: receiver }
    }

    /// Handle to the transfer registered under `key`, running or finished.
    #[must_use]
    pub fn attach(&self, key: &str) -> Option<DownloadHandle> {
        self.active().get(key).map(|download| DownloadHandle {
            status: download.status.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self, key: &str) -> bool {
        self.active().get(key).is_some_and(|download| {
            matches!(*download.status.borrow(), DownloadStatus::Running(_))
        })
    }

    /// Forget a finished transfer. Running transfers are left alone.
    pub fn release(&self, key: &str) {
        let mut active = self.active();
        let finished = active
            .get(key)
            .is_some_and(|download| matches!(*download.status.borrow(), DownloadStatus::Finished(_)));
        if finished {
            active.remove(key);
        }
    }

    /// Abort the transfer under `key`; partial data is kept for resuming.
    pub fn cancel(&self, key: &str) -> bool {
        match self.active().remove(key) {
            Some(download) => {
                download.task.abort();
                true
            }
            None => false,
        }
    }
}

/// Observer of one transfer.
#[derive(Debug, Clone)]
pub struct DownloadHandle {
    status: watch::Receiver<DownloadStatus>,
}

impl DownloadHandle {
    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        self.status.borrow().clone()
    }

    /// Wait for the next status update; `None` once no more will come.
    pub async fn next_status(&mut self) -> Option<DownloadStatus> {
        if let DownloadStatus::Finished(_) = &*self.status.borrow_and_update() {
            return None;
        }
        self.status.changed().await.ok()?;
        Some(self.status.borrow_and_update().clone())
    }

    /// Wait for the transfer to finish.
    pub async fn wait(mut self) -> DownloadOutcome {
        loop {
            if let DownloadStatus::Finished(outcome) = &*self.status.borrow_and_update() {
                return outcome.clone();
            }
            if self.status.changed().await.is_err() {
                if let DownloadStatus::Finished(outcome) = &*self.status.borrow() {
                    return outcome.clone();
                }
                return DownloadOutcome::failed(&DownloadError::Cancelled);
            }
        }
    }
}

fn sibling(dest: &Path, suffix: &str) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    dest.with_file_name(name)
}

fn ensure_secure(url: &str, allow_insecure: bool) -> Result<(), DownloadError> {
    let parsed = reqwest::Url::parse(url).map_err(DownloadError::transport)?;
    if parsed.scheme() == "https" || (allow_insecure && parsed.scheme() == "http") {
        Ok(())
    } else {
        Err(DownloadError::InsecureUrlRejected {
            url: url.to_string(),
        })
    }
}

/// Length of partial data that may be resumed for `url`.
async fn resumable_length(partial: &Path, marker: &Path, url: &str) -> u64 {
    let Ok(recorded_url) = tokio::fs::read_to_string(marker).await else {
        return 0;
    };
    if recorded_url != url {
        return 0;
    }
    tokio::fs::metadata(partial)
        .await
        .map_or(0, |metadata| metadata.len())
}

async fn discard_partial(partial: &Path, marker: &Path) {
    let _ = tokio::fs::remove_file(partial).await;
    let _ = tokio::fs::remove_file(marker).await;
}

/// Resource length from a `Content-Range: bytes */<length>` header.
fn unsatisfied_range_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .trim()
        .strip_prefix("bytes */")?
        .parse()
        .ok()
}

async fn transfer(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    status: &watch::Sender<DownloadStatus>,
    allow_insecure: bool,
) -> Result<u64, DownloadError> {
    ensure_secure(url, allow_insecure)?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = sibling(dest, PARTIAL_SUFFIX);
    let marker = sibling(dest, PARTIAL_URL_SUFFIX);
    let mut resume_from = resumable_length(&partial, &marker, url).await;

    let response = loop {
        let mut request = client.get(url);
        if resume_from > 0 {
            debug!("Resuming {url} from byte {resume_from}");
            request = request.header(RANGE, format!("bytes={resume_from}-"));
        }
        let response = request.send().await.map_err(DownloadError::transport)?;
        if resume_from == 0 || response.status() != StatusCode::RANGE_NOT_SATISFIABLE {
            break response;
        }

        // The previous run may have stopped between the last byte and the rename.
        if unsatisfied_range_length(response.headers()) == Some(resume_from) {
            debug!("Partial download of {url} was already complete");
            status.send_replace(DownloadStatus::Running(DownloadProgress {
                downloaded: resume_from,
                total: Some(resume_from),
            }));
            tokio::fs::rename(&partial, dest).await?;
            let _ = tokio::fs::remove_file(&marker).await;
            return Ok(resume_from);
        }
        debug!("Cannot resume {url}, starting over");
        discard_partial(&partial, &marker).await;
        resume_from = 0;
    };

    let code = response.status();
    if !code.is_success() {
        discard_partial(&partial, &marker).await;
        return Err(DownloadError::HttpStatus {
            status: code.as_u16(),
        });
    }

    let resumed = resume_from > 0 && code == StatusCode::PARTIAL_CONTENT;
    let mut downloaded = if resumed { resume_from } else { 0 };
    let total = response.content_length().map(|length| length + downloaded);

    let mut file = if resumed {
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&partial)
            .await?
    } else {
        tokio::fs::write(&marker, url).await?;
        tokio::fs::File::create(&partial).await?
    };
    status.send_replace(DownloadStatus::Running(DownloadProgress { downloaded, total }));

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => {
                file.flush().await?;
                return Err(DownloadError::transport(error));
            }
        };
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        status.send_replace(DownloadStatus::Running(DownloadProgress { downloaded, total }));
    }

    file.flush().await?;
    drop(file);
    tokio::fs::rename(&partial, dest).await?;
    let _ = tokio::fs::remove_file(&marker).await;
    Ok(downloaded)
}
