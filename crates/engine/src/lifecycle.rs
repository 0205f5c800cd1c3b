use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use common::{ControlCommand, EngineMode};
use strategy::TradingConfig;

/// How often the trading config file is checked for edits.
pub const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Immutable snapshot shared with every loop. A change of mode or config
/// publishes a whole new snapshot.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub mode: EngineMode,
    pub config: Arc<TradingConfig>,
}

impl RuntimeState {
    pub fn is_monitoring(&self) -> bool {
        self.mode == EngineMode::Monitoring
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("cannot start monitoring: {0}")]
    Refused(&'static str),
    #[error("config reload failed: {0}")]
    Reload(String),
    #[error("controller is not running")]
    Closed,
}

struct ControlRequest {
    command: ControlCommand,
    reply: oneshot::Sender<Result<String, ControlError>>,
}

/// Cloneable handle passed to the Telegram bot and the binary.
#[derive(Clone)]
pub struct ControlHandle {
    command_tx: mpsc::Sender<ControlRequest>,
    state_rx: watch::Receiver<RuntimeState>,
}

impl ControlHandle {
    /// Send a command and wait for the controller's answer.
    pub async fn send(&self, command: ControlCommand) -> Result<String, ControlError> {
        let (reply, answer) = oneshot::channel();
        self.command_tx
            .send(ControlRequest { command, reply })
            .await
            .map_err(|_| ControlError::Closed)?;
        answer.await.map_err(|_| ControlError::Closed)?
    }

    pub fn state(&self) -> RuntimeState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RuntimeState> {
        self.state_rx.clone()
    }
}

/// Owns the mode and the trading config. Applies start/stop/reload commands
/// and picks up edits to the config file.
pub struct Controller {
    config_path: PathBuf,
    state_tx: watch::Sender<RuntimeState>,
    command_rx: mpsc::Receiver<ControlRequest>,
    last_content: Option<String>,
}

impl Controller {
    /// The engine starts in discussion mode; monitoring begins on `Start`.
    pub fn new(config_path: impl Into<PathBuf>, initial: TradingConfig) -> (Self, ControlHandle) {
        let config_path = config_path.into();
        let (command_tx, command_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(RuntimeState {
            mode: EngineMode::Discussion,
            config: Arc::new(initial),
        });
        let last_content = std::fs::read_to_string(&config_path).ok();

        let controller = Controller {
            config_path,
            state_tx,
            command_rx,
            last_content,
        };
        let handle = ControlHandle {
            command_tx,
            state_rx,
        };
        (controller, handle)
    }

    /// Run the control loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(path = %self.config_path.display(), "Controller running in discussion mode");
        let mut ticker = tokio::time::interval(CONFIG_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = self.command_rx.recv() => {
                    let Some(ControlRequest { command, reply }) = request else {
                        warn!("Control channel closed, controller shutting down");
                        break;
                    };
                    let result = self.apply(command);
                    let _ = reply.send(result);
                }
                _ = ticker.tick() => self.check_config_file(),
            }
        }
    }

    fn apply(&mut self, command: ControlCommand) -> Result<String, ControlError> {
        let current = self.state_tx.borrow().clone();
        match command {
            ControlCommand::Start => {
                if current.is_monitoring() {
                    return Ok("Already monitoring.".into());
                }
                if let Some(reason) = current.config.monitor_blocker() {
                    warn!(reason, "Start refused");
                    return Err(ControlError::Refused(reason));
                }
                info!(symbol = %current.config.symbol, "Monitoring started");
                self.publish(EngineMode::Monitoring, current.config);
                Ok("Monitoring started.".into())
            }
            ControlCommand::Stop => {
                if !current.is_monitoring() {
                    return Ok("Already stopped.".into());
                }
                info!("Monitoring stopped");
                self.publish(EngineMode::Discussion, current.config);
                Ok("Monitoring stopped.".into())
            }
            ControlCommand::Reload => {
                let content = std::fs::read_to_string(&self.config_path)
                    .map_err(|e| ControlError::Reload(e.to_string()))?;
                self.reload(content)?;
                Ok("Config reloaded.".into())
            }
        }
    }

    /// Reload when the file content differs from what was last applied.
    /// A file that fails to parse keeps the previous snapshot.
    fn check_config_file(&mut self) {
        let content = match std::fs::read_to_string(&self.config_path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %self.config_path.display(), error = %e, "Cannot read trading config");
                return;
            }
        };
        if self.last_content.as_deref() == Some(content.as_str()) {
            return;
        }
        if let Err(e) = self.reload(content) {
            warn!(error = %e, "Keeping previous trading config");
        }
    }

    fn reload(&mut self, content: String) -> Result<(), ControlError> {
        let parsed = TradingConfig::from_toml_str(&content);
        // Remember the content either way so a broken file is reported once
        self.last_content = Some(content);
        let config = parsed.map_err(|e| ControlError::Reload(e.to_string()))?;

        let mut mode = self.state_tx.borrow().mode;
        if mode == EngineMode::Monitoring {
            if let Some(reason) = config.monitor_blocker() {
                warn!(reason, "Reloaded config cannot be monitored, stopping");
                mode = EngineMode::Discussion;
            }
        }
        info!(symbol = %config.symbol, interval_secs = config.interval_secs, "Trading config applied");
        self.publish(mode, Arc::new(config));
        Ok(())
    }

    fn publish(&self, mode: EngineMode, config: Arc<TradingConfig>) {
        self.state_tx.send_replace(RuntimeState { mode, config });
    }
}
