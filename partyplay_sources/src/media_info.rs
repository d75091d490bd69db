use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::{format_err, Result};
use symphonia::core::{
    formats::{FormatOptions, FormatReader},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::{MetadataOptions, StandardTagKey},
    probe::{Hint, ProbeResult},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<Duration>,
}

/// Reads tags and playable duration of an audio file.
///
/// The duration comes from the container header when present, otherwise from summing packet durations.
pub fn read_media_info(path: &Path) -> Result<MediaInfo> {
    let file = Box::new(File::open(path)?);
    let mss = MediaSourceStream::new(file, MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ex| ex.to_str()) {
        hint.with_extension(&ext.to_lowercase());
    }
    let format_opts = FormatOptions {
        enable_gapless: false,
        ..Default::default()
    };
    let mut probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &MetadataOptions::default())
        .map_err(|e| format_err!("Media probe failed for {}: {e}", path.display()))?;

    let mut info = read_tags(&mut probed);
    info.duration = header_duration(&*probed.format).or_else(|| packet_duration(&mut *probed.format));
    Ok(info)
}

fn read_tags(probed: &mut ProbeResult) -> MediaInfo {
    let mut info = MediaInfo::default();
    let mut apply = |revision: &symphonia::core::meta::MetadataRevision| {
        for tag in revision.tags().iter().filter(|t| t.is_known()) {
            let value = Some(tag.value.to_string());
            match tag.std_key {
                Some(StandardTagKey::TrackTitle) => info.title = value,
                Some(StandardTagKey::Artist) => info.artist = value,
                Some(StandardTagKey::Album) => info.album = value,
                _ => {}
            }
        }
    };
    // id3v2 tags in front of the container land in the probe metadata, the rest in the format reader
    if let Some(metadata) = probed.metadata.get() {
        if let Some(revision) = metadata.current() {
            apply(revision);
        }
    }
    if let Some(revision) = probed.format.metadata().current() {
        apply(revision);
    }
    info
}

fn header_duration(reader: &dyn FormatReader) -> Option<Duration> {
    let track = reader.default_track()?;
    let params = &track.codec_params;
    let time = params.time_base?.calc_time(params.n_frames?);
    Some(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
}

fn packet_duration(reader: &mut dyn FormatReader) -> Option<Duration> {
    let track = reader.default_track()?;
    let track_id = track.id;
    let time_base = track.codec_params.time_base?;
    let mut total = 0u64;
    while let Ok(packet) = reader.next_packet() {
        if packet.track_id() == track_id {
            total += packet.dur;
        }
    }
    if total == 0 {
        return None;
    }
    let time = time_base.calc_time(total);
    Some(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
}
