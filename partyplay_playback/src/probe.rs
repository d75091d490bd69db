use std::path::PathBuf;
use std::time::Duration;

use log::{debug, warn};
use partyplay_sources::media_info::read_media_info;

/// Playable length of a cached artifact, or `declared` when the file cannot be probed.
pub async fn probe_duration(artifact: PathBuf, declared: Duration) -> Duration {
    let shown = artifact.display().to_string();
    match tokio::task::spawn_blocking(move || read_media_info(&artifact)).await {
        Ok(Ok(info)) => match info.duration.filter(|d| !d.is_zero()) {
            Some(duration) => {
                debug!("Probed {shown}: {duration:?}");
                duration
            }
            None => {
                warn!("No duration in {shown}, using declared {declared:?}");
                declared
            }
        },
        Ok(Err(e)) => {
            warn!("Probing {shown} failed: {e:#}, using declared {declared:?}");
            declared
        }
        Err(e) => {
            warn!("Probe task for {shown} failed: {e}");
            declared
        }
    }
}
