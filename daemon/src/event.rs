use crate::config::Config;
use crate::keys::ControlCommand;
use crate::scheduler::Expiry;

pub enum DaemonEvent {
    /// The configured game executable appeared in the process list.
    GameStarted,
    /// The game process exited; sampling pauses until it returns.
    GameStopped,
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// A key press mapped to a control command.
    Control(ControlCommand),
    /// A real-time countdown armed by the scheduler ran out.
    TimerExpired(Expiry),
    /// Ctrl+C received; persist history and exit.
    Shutdown,
}
