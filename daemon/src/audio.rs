/// Audible alerts for finished countdowns.
///
/// Playback runs on a dedicated thread owning the rodio output stream; the
/// rest of the daemon only sends file paths over a channel. A missing device
/// or sound file never reaches the caller.
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::mpsc::{self, Sender},
    thread,
};

use rodio::{Decoder, OutputStream, Sink};
use tracing::{debug, warn};

use crate::policy::EventKind;
use crate::timer::TimerEvent;

/// Sound for a finished instance of `kind`, relative to `<assets>/audio`.
pub fn alert_file(kind: EventKind, label: Option<&str>) -> Option<PathBuf> {
    let file = match (kind, label) {
        (EventKind::Roshan, _) => "roshan/roshan_respawn.mp3",
        (EventKind::Tormentor, Some("Dire")) => "tormentor/dire_tormentor_respawn.mp3",
        (EventKind::Tormentor, _) => "tormentor/radiant_tormentor_respawn.mp3",
        (EventKind::Rune, _) => "bottle/rune_expiring.mp3",
        (EventKind::Bottle, _) => return None,
    };
    Some(PathBuf::from(file))
}

#[derive(Clone)]
pub struct AudioPlayer {
    tx: Sender<PathBuf>,
    audio_dir: PathBuf,
}

impl AudioPlayer {
    pub fn new(assets_dir: &Path) -> Self {
        let (tx, rx) = mpsc::channel::<PathBuf>();
        thread::Builder::new()
            .name("audio".into())
            .spawn(move || {
                let mut output = OutputStream::try_default().ok();
                if output.is_none() {
                    warn!("audio output unavailable; alerts disabled until a device appears");
                }
                let mut active_sinks: Vec<Sink> = Vec::new();

                while let Ok(path) = rx.recv() {
                    active_sinks.retain(|sink| !sink.empty());

                    if output.is_none() {
                        output = OutputStream::try_default().ok();
                    }
                    let Some((_, handle)) = output.as_ref() else {
                        continue;
                    };

                    let file = match File::open(&path) {
                        Ok(file) => file,
                        Err(err) => {
                            debug!(?err, path = %path.display(), "failed opening sound file");
                            continue;
                        }
                    };
                    let decoder = match Decoder::new(BufReader::new(file)) {
                        Ok(decoder) => decoder,
                        Err(err) => {
                            debug!(?err, path = %path.display(), "failed decoding sound file");
                            continue;
                        }
                    };

                    match Sink::try_new(handle) {
                        Ok(sink) => {
                            sink.append(decoder);
                            active_sinks.push(sink);
                        }
                        Err(err) => {
                            warn!(?err, "failed to create audio sink");
                            output = None;
                        }
                    }
                }
            })
            .map_err(|e| warn!("failed to spawn audio thread: {e}"))
            .ok();

        Self { tx, audio_dir: assets_dir.join("audio") }
    }

    /// Plays the alert for every `Finished` event.
    pub fn announce(&self, events: &[TimerEvent]) {
        for event in events {
            if let TimerEvent::Finished { kind, label } = event {
                if let Some(file) = alert_file(*kind, label.as_deref()) {
                    let _ = self.tx.send(self.audio_dir.join(file));
                }
            }
        }
    }
}
