use std::sync::Arc;
use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration};

use crate::config::Config;
use crate::event::DaemonEvent;

const POLL_INTERVAL_SECS: u64 = 2;

/// Polls the OS process list every [`POLL_INTERVAL_SECS`] seconds and emits
/// [`DaemonEvent::GameStarted`] / [`DaemonEvent::GameStopped`] whenever the
/// configured game executable appears or disappears.
///
/// An empty `game_executable` means the game is always considered running.
pub async fn run(config: Arc<RwLock<Config>>, tx: mpsc::Sender<DaemonEvent>) {
    let mut sys = System::new();
    let mut running = false;
    let mut ticker = interval(Duration::from_secs(POLL_INTERVAL_SECS));

    loop {
        ticker.tick().await;

        let target = config.read().await.global.game_executable.to_lowercase();
        let found = if target.is_empty() {
            true
        } else {
            sys.refresh_processes(ProcessesToUpdate::All, false);
            is_running(
                sys.processes().values().map(|p| p.name().to_string_lossy().into_owned()),
                &target,
            )
        };

        let event = match (running, found) {
            (false, true) => {
                tracing::info!(executable = %target, "game detected");
                DaemonEvent::GameStarted
            }
            (true, false) => {
                tracing::info!(executable = %target, "game exited");
                DaemonEvent::GameStopped
            }
            _ => continue,
        };
        running = found;
        if tx.send(event).await.is_err() {
            break;
        }
    }
}

/// Case-insensitive match of `target` against process names.
fn is_running(mut names: impl Iterator<Item = String>, target: &str) -> bool {
    names.any(|name| name.to_lowercase() == target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn is_running_ignores_case() {
        assert!(is_running(names(&["explorer.exe", "Dota2.EXE"]), "dota2.exe"));
    }

    #[test]
    fn is_running_requires_exact_name() {
        assert!(!is_running(names(&["dota2.exe.bak"]), "dota2.exe"));
        assert!(!is_running(names(&[]), "dota2.exe"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_executable_reports_game_started_once() {
        let mut config = Config::default();
        config.global.game_executable.clear();
        let (tx, mut rx) = mpsc::channel(4);
        let handle = tokio::spawn(run(Arc::new(RwLock::new(config)), tx));

        assert!(matches!(rx.recv().await, Some(DaemonEvent::GameStarted)));
        tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS * 3)).await;
        assert!(rx.try_recv().is_err());
        handle.abort();
    }
}
