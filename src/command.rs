//! Turns the controller's byte stream into work items.
//!
//! An activation code opens a window of a fixed number of polls during
//! which exactly one follow-up code is accepted. The window closes early on
//! a follow-up, or expires with an "inactive" prompt.

use std::{sync::Arc, time::Duration};

use common::{CommandCode, PeerAddress};
use log::{debug, info, warn};
use tokio::sync::{
    mpsc::{self, error::TryRecvError},
    Mutex,
};

use crate::{
    dispatch::DispatchHandle,
    signal::{Control, Notification},
    state::{DeviceMode, LightMode},
    WindowEvent, WorkMessage,
};

/// What the window made of one input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowAction {
    Opened,
    Accepted(CommandCode),
    Ignored,
}

/// The accepting flag plus its countdown, in polls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandWindow {
    accepting: bool,
    countdown: u8,
    length: u8,
}

impl CommandWindow {
    pub fn new(length: u8) -> Self {
        Self {
            accepting: false,
            countdown: 0,
            length,
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn countdown(&self) -> u8 {
        self.countdown
    }

    pub fn on_command(&mut self, code: CommandCode) -> WindowAction {
        match code {
            // Activation always (re)opens the window
            CommandCode::Activate => {
                self.accepting = true;
                self.countdown = self.length;
                WindowAction::Opened
            }
            follow_up if self.accepting => {
                self.accepting = false;
                self.countdown = 0;
                WindowAction::Accepted(follow_up)
            }
            _ => WindowAction::Ignored,
        }
    }

    /// Advance one poll. Returns true exactly once per window that runs out
    /// without a follow-up.
    pub fn tick(&mut self) -> bool {
        if self.countdown > 0 {
            self.countdown -= 1;
            false
        } else if self.accepting {
            self.accepting = false;
            true
        } else {
            false
        }
    }
}

/// Bytes buffered between the controller link and the interpreter.
pub const COMMAND_QUEUE_DEPTH: usize = 32;

/// Shared across sessions; each session's interpreter holds the lock while
/// it runs.
pub type CommandQueue = Arc<Mutex<mpsc::Receiver<u8>>>;

pub struct CommandInterpreter {
    commands: CommandQueue,
    work: DispatchHandle<WorkMessage>,
    control: Arc<Notification<Control>>,
    peer: PeerAddress,
    poll: Duration,
    window: CommandWindow,
}

impl CommandInterpreter {
    pub fn new(
        commands: CommandQueue,
        work: DispatchHandle<WorkMessage>,
        control: Arc<Notification<Control>>,
        peer: PeerAddress,
        poll: Duration,
        window_polls: u8,
    ) -> Self {
        Self {
            commands,
            work,
            control,
            peer,
            poll,
            window: CommandWindow::new(window_polls),
        }
    }

    pub async fn run(mut self) {
        info!("Command interpreter started for {}", self.peer);
        let commands = self.commands.clone();
        let mut commands = commands.lock().await;

        loop {
            match commands.try_recv() {
                Ok(byte) => {
                    if !self.handle_byte(byte, &mut commands).await {
                        break;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }

            // One tick per poll, whether or not a command arrived
            if self.window.tick() {
                info!("Command window expired");
                self.work
                    .dispatch(WorkMessage::CommandWindow(WindowEvent::Inactive))
                    .await;
            }

            if self.control.wait_timeout(self.poll).await == Some(Control::Abort) {
                break;
            }
        }
        info!("Command interpreter stopped");
    }

    /// Returns false if the task was aborted while handling the byte.
    async fn handle_byte(&mut self, byte: u8, commands: &mut mpsc::Receiver<u8>) -> bool {
        let code = match CommandCode::try_from(byte) {
            Ok(code) => code,
            Err(unknown) => {
                warn!("Ignoring unknown command byte {}", unknown);
                return true;
            }
        };

        let follow_up = match self.window.on_command(code) {
            WindowAction::Opened => {
                info!("Command window open");
                self.work
                    .dispatch(WorkMessage::CommandWindow(WindowEvent::Active))
                    .await;
                return true;
            }
            WindowAction::Ignored => {
                debug!("{:?} outside the command window", code);
                return true;
            }
            WindowAction::Accepted(code) => code,
        };

        info!("Command accepted: {:?}", follow_up);
        self.work
            .dispatch(WorkMessage::CommandWindow(WindowEvent::Accepted))
            .await;

        let message = match follow_up {
            CommandCode::DefaultMode => WorkMessage::SetMode {
                mode: DeviceMode::DefaultPlayback,
                peer: self.peer,
            },
            CommandCode::BluetoothMode => WorkMessage::SetMode {
                mode: DeviceMode::BluetoothSink,
                peer: self.peer,
            },
            CommandCode::LightOn => WorkMessage::SetLight(LightMode::On),
            CommandCode::LightOff => WorkMessage::SetLight(LightMode::Off),
            CommandCode::VolumeChange => {
                // The level follows as one more byte, however long it takes
                let level = tokio::select! {
                    level = commands.recv() => level,
                    _ = self.wait_abort() => return false,
                };
                match level {
                    Some(level) => WorkMessage::ChangeVolume { level },
                    None => {
                        warn!("Command link closed before the volume level arrived");
                        return true;
                    }
                }
            }
            CommandCode::Activate => return true,
        };
        self.work.dispatch(message).await;
        true
    }

    async fn wait_abort(&self) {
        while self.control.wait().await != Control::Abort {}
    }
}
