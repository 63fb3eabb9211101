//! Periodic backup of the data files
//!
//! Each backup is one `ddns-updater-backup-<unix nanos>.zip` archive holding
//! the data files that exist at that moment, stored under their file names.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, error, info};
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Archive `files` into `backup_dir/ddns-updater-backup-<stamp>.zip`
///
/// Files that do not exist yet are skipped.
pub async fn backup_once(files: &[PathBuf], backup_dir: &Path, stamp: u128) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(backup_dir).await?;
    let target = backup_dir.join(format!("ddns-updater-backup-{}.zip", stamp));

    let files = files.to_vec();
    let archive = target.clone();
    tokio::task::spawn_blocking(move || write_archive(&archive, &files))
        .await
        .map_err(io::Error::other)??;

    Ok(target)
}

fn write_archive(target: &Path, files: &[PathBuf]) -> io::Result<()> {
    let mut zip = ZipWriter::new(File::create(target)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for file in files {
        let Some(name) = file.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let content = match std::fs::read(file) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Skipping backup of missing {}", file.display());
                continue;
            }
            Err(e) => return Err(e),
        };
        zip.start_file(name, options).map_err(io::Error::other)?;
        zip.write_all(&content)?;
    }

    zip.finish().map_err(io::Error::other)?.sync_all()
}

/// Back up `files` now and every `period` until shutdown
///
/// Does nothing when `period` is zero. Failures are logged only.
pub async fn run_backup_loop(
    period: Duration,
    files: Vec<PathBuf>,
    backup_dir: PathBuf,
    mut shutdown: watch::Receiver<bool>,
) {
    if period.is_zero() {
        info!("Backup disabled");
        return;
    }
    info!("Backing up every {:?}, writing zip files to {}", period, backup_dir.display());

    loop {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();

        match backup_once(&files, &backup_dir, stamp).await {
            Ok(path) => debug!("Backup written to {}", path.display()),
            Err(e) => error!("Backup failed: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.wait_for(|stop| *stop) => return,
        }
    }
}
