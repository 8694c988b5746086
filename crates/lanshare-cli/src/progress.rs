//! Transfer progress display and event rendering.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use lanshare_core::transfer::{CancelOrigin, TransferDirection};
use lanshare_core::TransferEvent;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Transfer progress tracker
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    /// Create a new progress tracker under `multi`
    #[must_use]
    pub fn new(multi: &MultiProgress, total_bytes: u64, label: String) -> Self {
        let bar = multi.add(ProgressBar::new(total_bytes));

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .expect("Invalid progress bar template")
                .progress_chars("#>-")
        );

        bar.set_message(label);

        Self { bar }
    }

    /// Update progress
    pub fn update(&self, transferred_bytes: u64) {
        self.bar.set_position(transferred_bytes);
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Abandon the progress bar with a message (for errors and cancels)
    pub fn abandon_with_message(&self, msg: String) {
        self.bar.abandon_with_message(msg);
    }
}

/// Renders endpoint events on the terminal.
///
/// Keeps at most one bar per direction, matching the one-outbound and
/// one-inbound limit of an endpoint.
pub struct SessionView {
    multi: MultiProgress,
    output_dir: PathBuf,
    outbound: Option<TransferProgress>,
    inbound: Option<TransferProgress>,
}

impl SessionView {
    /// Create a view saving received objects under `output_dir`
    #[must_use]
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            multi: MultiProgress::new(),
            output_dir,
            outbound: None,
            inbound: None,
        }
    }

    /// Print a line above any active bars
    pub fn println(&self, line: impl AsRef<str>) {
        if self.multi.println(line.as_ref()).is_err() {
            println!("{}", line.as_ref());
        }
    }

    /// Render one event. Returns `false` once the channel has closed.
    pub async fn handle(&mut self, event: TransferEvent) -> bool {
        match event {
            TransferEvent::Chat { text } => {
                self.println(format!("{} {text}", style("peer>").cyan().bold()));
            }
            TransferEvent::OutboundStarted { name, size, .. } => {
                let label = format!("Sending: {name} ({})", format_bytes(size));
                self.outbound = Some(TransferProgress::new(&self.multi, size, label));
            }
            TransferEvent::InboundStarted { name, size, .. } => {
                let label = format!("Receiving: {name} ({})", format_bytes(size));
                self.inbound = Some(TransferProgress::new(&self.multi, size, label));
            }
            TransferEvent::Progress {
                direction,
                transferred,
                ..
            } => {
                if let Some(bar) = self.bar(direction) {
                    bar.update(transferred);
                }
            }
            TransferEvent::OutboundCompleted { name, size, .. } => {
                let msg = format!("{} {name} ({})", style("Sent").green(), format_bytes(size));
                self.finish(TransferDirection::Outbound, msg);
            }
            TransferEvent::InboundCompleted { name, data, .. } => {
                let msg = match save_received(&self.output_dir, &name, &data).await {
                    Ok(path) => {
                        info!(path = %path.display(), bytes = data.len(), "Saved received object");
                        format!(
                            "{} {name} -> {}",
                            style("Received").green(),
                            path.display()
                        )
                    }
                    Err(e) => {
                        warn!(error = %e, name = %name, "Failed to save received object");
                        format!("{} {name}: {e}", style("Could not save").red())
                    }
                };
                self.finish(TransferDirection::Inbound, msg);
            }
            TransferEvent::Cancelled {
                direction,
                name,
                origin,
                reason,
                ..
            } => {
                let who = match origin {
                    CancelOrigin::Local => "cancelled",
                    CancelOrigin::Peer => "cancelled by peer",
                };
                let msg = format!("{} {name} {who}: {reason}", style("✗").yellow());
                self.abandon(direction, msg);
            }
            TransferEvent::Failed {
                direction,
                name,
                reason,
                ..
            } => {
                let msg = format!("{} {direction} {name} failed: {reason}", style("✗").red());
                self.abandon(direction, msg);
            }
            TransferEvent::MetaRejected { name, .. } => {
                self.println(format!(
                    "{} peer is sending too quickly; rejected {name}",
                    style("!").yellow()
                ));
            }
            TransferEvent::ChannelClosed => {
                self.println(style("Connection closed").dim().to_string());
                return false;
            }
        }
        true
    }

    fn bar(&self, direction: TransferDirection) -> Option<&TransferProgress> {
        match direction {
            TransferDirection::Outbound => self.outbound.as_ref(),
            TransferDirection::Inbound => self.inbound.as_ref(),
        }
    }

    fn take_bar(&mut self, direction: TransferDirection) -> Option<TransferProgress> {
        match direction {
            TransferDirection::Outbound => self.outbound.take(),
            TransferDirection::Inbound => self.inbound.take(),
        }
    }

    fn finish(&mut self, direction: TransferDirection, msg: String) {
        match self.take_bar(direction) {
            Some(bar) => bar.finish_with_message(msg),
            None => self.println(msg),
        }
    }

    fn abandon(&mut self, direction: TransferDirection, msg: String) {
        match self.take_bar(direction) {
            Some(bar) => bar.abandon_with_message(msg),
            None => self.println(msg),
        }
    }
}

/// Reduce a peer-supplied name to a single safe path component
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');

    if cleaned.is_empty() {
        "received.bin".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Write a received object into `dir` without overwriting existing files.
///
/// A clash appends ` (n)` before the extension.
///
/// # Errors
///
/// Returns any I/O error from creating the file.
pub async fn save_received(dir: &Path, name: &str, data: &[u8]) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let file_name = sanitize_file_name(name);
    let path = Path::new(&file_name);
    let stem = path
        .file_stem()
        .map_or_else(|| file_name.clone(), |s| s.to_string_lossy().into_owned());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    for n in 0u32.. {
        let candidate = if n == 0 {
            dir.join(&file_name)
        } else {
            match &ext {
                Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
                None => dir.join(format!("{stem} ({n})")),
            }
        };

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(data).await?;
                file.flush().await?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "no free file name",
    ))
}

/// Format bytes in human-readable format
///
/// # Example
///
/// ```ignore
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use lanshare_core::transfer::TransferId;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(40_000), "39.06 KB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\a.txt"), "a.txt");
        assert_eq!(sanitize_file_name(".bashrc"), "bashrc");
        assert_eq!(sanitize_file_name("a\nb"), "a_b");
        assert_eq!(sanitize_file_name(""), "received.bin");
        assert_eq!(sanitize_file_name("dir/"), "received.bin");
        assert_eq!(sanitize_file_name(".."), "received.bin");
    }

    #[tokio::test]
    async fn test_save_received_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();

        let first = save_received(dir.path(), "notes.txt", b"one").await.unwrap();
        let second = save_received(dir.path(), "notes.txt", b"two").await.unwrap();
        let third = save_received(dir.path(), "notes.txt", b"three").await.unwrap();

        assert_eq!(first, dir.path().join("notes.txt"));
        assert_eq!(second, dir.path().join("notes (1).txt"));
        assert_eq!(third, dir.path().join("notes (2).txt"));
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&third).unwrap(), b"three");
    }

    #[tokio::test]
    async fn test_save_received_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("inbox/today");

        let path = save_received(&nested, "Makefile", b"all:").await.unwrap();
        assert_eq!(path, nested.join("Makefile"));
    }

    #[tokio::test]
    async fn test_view_saves_inbound_and_stops_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut view = SessionView::new(dir.path().to_path_buf());
        view.multi
            .set_draw_target(indicatif::ProgressDrawTarget::hidden());

        let id = TransferId::from_wire("abc");
        assert!(
            view.handle(TransferEvent::InboundStarted {
                id: id.clone(),
                name: "a.bin".into(),
                size: 3,
            })
            .await
        );
        assert!(view.inbound.is_some());
        assert!(
            view.handle(TransferEvent::InboundCompleted {
                id,
                name: "a.bin".into(),
                data: Bytes::from_static(b"xyz"),
            })
            .await
        );
        assert!(view.inbound.is_none());
        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"xyz");

        assert!(!view.handle(TransferEvent::ChannelClosed).await);
    }
}
