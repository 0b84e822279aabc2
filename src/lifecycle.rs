//! Wake, sleep and forced shutdown.
//!
//! A session starts when the controller link opens and ends when it
//! closes. Each session gets a fresh audio pipeline, work queue and set of
//! companion tasks; the peripherals, clip storage and command queue outlive
//! it.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::PeerAddress;
use log::{error, info, warn};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    audio::{
        playback::Playback, writer::OutputWriter, AudioPipeline, Volume, BITS_PER_SAMPLE,
        CHANNELS, SAMPLE_RATE,
    },
    command::{CommandInterpreter, CommandQueue},
    config::Config,
    coordinator::{ModeCoordinator, TaskSignals},
    dispatch::{self, DispatchHandle, WorkHandler, WORK_QUEUE_DEPTH},
    error::Result,
    lights::LightController,
    peripherals::{lock, Peripherals},
    power::SensorTask,
    signal::{Control, Notification},
    state::{DeviceMode, OutputGate},
    storage::ClipStorage,
    NarrationEvent, WorkMessage,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The controller link opened
    Wake { peer: PeerAddress },
    /// The controller link closed
    Sleep,
    /// The battery hit the critical bound
    ForceShutdown,
}

/// Everything a companion task needs from its session.
struct CompanionContext {
    config: Config,
    pipeline: Arc<AudioPipeline>,
    peripherals: Peripherals,
    storage: Arc<dyn ClipStorage>,
    work: DispatchHandle<WorkMessage>,
    lifecycle: mpsc::Sender<LifecycleEvent>,
    commands: CommandQueue,
    peer: PeerAddress,
}

/// The light, sensor, command and playback tasks of one session. They are
/// started from the work queue so that they come up after the wake prompt.
pub struct Companions {
    context: CompanionContext,
    sensor: Arc<Notification<Control>>,
    command: Arc<Notification<Control>>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Companions {
    fn new(context: CompanionContext) -> Self {
        Self {
            context,
            sensor: Arc::new(Notification::new()),
            command: Arc::new(Notification::new()),
            handles: Vec::new(),
        }
    }

    fn start(&mut self, signals: &TaskSignals) {
        if !self.handles.is_empty() {
            warn!("Companion tasks already running");
            return;
        }
        let ctx = &self.context;
        let timings = &ctx.config.timings;

        let lights = LightController::new(
            ctx.pipeline.clone(),
            ctx.peripherals.strip.clone(),
            ctx.peripherals.lamps.clone(),
            signals.lights.clone(),
            timings.frame_ready_wait(),
            timings.overlay_frame(),
        );
        let sensor = SensorTask::new(
            ctx.config.power.clone(),
            ctx.peripherals.sensor.clone(),
            ctx.work.clone(),
            ctx.lifecycle.clone(),
            self.sensor.clone(),
            timings.sensor_poll(),
        );
        let command = CommandInterpreter::new(
            ctx.commands.clone(),
            ctx.work.clone(),
            self.command.clone(),
            ctx.peer,
            timings.command_poll(),
            timings.command_window_polls,
        );
        let playback = Playback::new(
            ctx.pipeline.clone(),
            ctx.peripherals.output.clone(),
            ctx.storage.clone(),
            signals.playback.clone(),
            ctx.config.audio.clip_header_len,
            ctx.config.audio.track_tail_margin,
        );

        self.handles = vec![
            ("light", tokio::spawn(lights.run())),
            ("sensor", tokio::spawn(sensor.run())),
            ("command", tokio::spawn(command.run())),
            ("playback", tokio::spawn(playback.run())),
        ];
        info!("Companion tasks started");
    }

    fn stop(&self, signals: &TaskSignals) {
        for control in [&signals.lights, &signals.playback, &self.sensor, &self.command] {
            control.post(Control::Abort);
        }
    }

    /// Wait for every companion to finish, giving up on any that take
    /// longer than `grace`.
    async fn join(self, grace: Duration) {
        for (name, handle) in self.handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("{} task failed: {}", name, e),
                Err(_) => {
                    warn!("{} task did not stop in time", name);
                    abort.abort();
                }
            }
        }
    }
}

/// The work queue's handler for one session.
pub struct SessionWorker {
    coordinator: ModeCoordinator,
    companions: Companions,
}

#[async_trait]
impl WorkHandler<WorkMessage> for SessionWorker {
    async fn handle(&mut self, message: WorkMessage) -> Result<()> {
        match message {
            WorkMessage::SetMode { mode, peer } => self.coordinator.set_mode(mode, peer).await,
            WorkMessage::ChangeVolume { level } => self.coordinator.change_volume(level),
            WorkMessage::SetLight(light) => {
                self.coordinator.set_light(light);
                Ok(())
            }
            WorkMessage::Narrate(event) => self.coordinator.narrate(event.clip()).await,
            WorkMessage::CommandWindow(event) => self.coordinator.command_window(event).await,
            WorkMessage::Power(event) => self.coordinator.power_event(event).await,
            WorkMessage::StartCompanions => {
                self.companions.start(self.coordinator.signals());
                Ok(())
            }
            WorkMessage::StopCompanions => {
                self.companions.stop(self.coordinator.signals());
                Ok(())
            }
        }
    }
}

/// Tasks and handles of the running session.
struct Session {
    peer: PeerAddress,
    work: DispatchHandle<WorkMessage>,
    dispatcher: JoinHandle<SessionWorker>,
    dispatcher_control: Arc<Notification<Control>>,
    writer: JoinHandle<()>,
    writer_control: Arc<Notification<Control>>,
    mode: watch::Receiver<DeviceMode>,
}

pub struct LifecycleController {
    config: Config,
    peripherals: Peripherals,
    storage: Arc<dyn ClipStorage>,
    commands: CommandQueue,
    events: mpsc::Receiver<LifecycleEvent>,
    /// Weak so that `run` ends once every outside sender is gone
    loopback: mpsc::WeakSender<LifecycleEvent>,
    session: Option<Session>,
    /// Set by a forced shutdown so the following sleep skips its prompt
    critical: bool,
    awake: watch::Sender<bool>,
}

impl LifecycleController {
    pub fn new(
        config: Config,
        peripherals: Peripherals,
        storage: Arc<dyn ClipStorage>,
        commands: CommandQueue,
    ) -> (Self, mpsc::Sender<LifecycleEvent>) {
        let (sender, events) = mpsc::channel(8);
        let (awake, _) = watch::channel(false);
        (
            Self {
                config,
                peripherals,
                storage,
                commands,
                events,
                loopback: sender.downgrade(),
                session: None,
                critical: false,
                awake,
            },
            sender,
        )
    }

    /// True while a session is running.
    pub fn awake(&self) -> watch::Receiver<bool> {
        self.awake.subscribe()
    }

    /// Mode of the running session, if any.
    pub fn mode(&self) -> Option<DeviceMode> {
        self.session.as_ref().map(|session| *session.mode.borrow())
    }

    pub async fn run(mut self) {
        info!("Lifecycle controller started");
        while let Some(event) = self.events.recv().await {
            self.handle(event).await;
        }
        if self.session.is_some() {
            self.sleep().await;
        }
        info!("Lifecycle controller stopped");
    }

    pub async fn handle(&mut self, event: LifecycleEvent) {
        info!("Lifecycle event: {:?}", event);
        match event {
            LifecycleEvent::Wake { peer } => self.wake(peer).await,
            LifecycleEvent::ForceShutdown => self.force_shutdown().await,
            LifecycleEvent::Sleep => self.sleep().await,
        }
    }

    async fn wake(&mut self, peer: PeerAddress) {
        if self.session.is_some() {
            warn!("Already awake, ignoring wake from {}", peer);
            return;
        }
        let Some(lifecycle) = self.loopback.upgrade() else {
            warn!("Lifecycle channel closed, not waking");
            return;
        };
        let timings = &self.config.timings;

        if let Err(e) = lock(&self.peripherals.output).configure(SAMPLE_RATE, BITS_PER_SAMPLE, CHANNELS) {
            error!("Audio output configuration failed: {}", e);
        }

        let pipeline = Arc::new(AudioPipeline::new(
            self.config.audio.ring_capacity,
            Arc::new(OutputGate::new()),
        ));
        let signals = TaskSignals::default();

        let writer_control = Arc::new(Notification::new());
        let writer = OutputWriter::new(
            pipeline.clone(),
            self.peripherals.output.clone(),
            signals.volume.clone(),
            writer_control.clone(),
            timings.writer_receive(),
        )
        .spawn();
        signals.volume.post(Volume::new(self.config.audio.wake_volume));

        let (work, dispatcher) = dispatch::channel(WORK_QUEUE_DEPTH, timings.dispatch_send_timeout());
        let coordinator = ModeCoordinator::new(
            pipeline.clone(),
            self.peripherals.clone(),
            self.storage.clone(),
            signals,
            timings.clone(),
            self.config.audio.clone(),
        );
        let mode = coordinator.subscribe();
        let companions = Companions::new(CompanionContext {
            config: self.config.clone(),
            pipeline,
            peripherals: self.peripherals.clone(),
            storage: self.storage.clone(),
            work: work.clone(),
            lifecycle,
            commands: self.commands.clone(),
            peer,
        });

        let dispatcher_control = Arc::new(Notification::new());
        let dispatcher = tokio::spawn(dispatcher.run(
            SessionWorker {
                coordinator,
                companions,
            },
            dispatcher_control.clone(),
        ));

        work.dispatch(WorkMessage::Narrate(NarrationEvent::Wake)).await;
        work.dispatch(WorkMessage::StartCompanions).await;

        self.session = Some(Session {
            peer,
            work,
            dispatcher,
            dispatcher_control,
            writer,
            writer_control,
            mode,
        });
        self.awake.send_replace(true);
        info!("Awake, controller {}", peer);
    }

    async fn force_shutdown(&mut self) {
        let Some(session) = &self.session else {
            warn!("Forced shutdown while asleep, ignoring");
            return;
        };
        if self.critical {
            return;
        }
        session
            .work
            .dispatch(WorkMessage::SetMode {
                mode: DeviceMode::Idle,
                peer: session.peer,
            })
            .await;
        session
            .work
            .dispatch(WorkMessage::Narrate(NarrationEvent::CriticalBattery))
            .await;
        self.critical = true;

        // Dropping the controller link is what puts the device to sleep
        match self.loopback.upgrade() {
            Some(lifecycle) => {
                if lifecycle.send(LifecycleEvent::Sleep).await.is_err() {
                    warn!("Could not queue sleep after forced shutdown");
                }
            }
            None => self.sleep().await,
        }
    }

    /// Empty the command queue. Bytes still in it belong to a session that
    /// has ended.
    async fn discard_stale_commands(&self) {
        let mut commands = self.commands.lock().await;
        let mut discarded = 0;
        while commands.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            info!("Discarded {} stale command bytes", discarded);
        }
    }

    async fn sleep(&mut self) {
        let Some(session) = self.session.take() else {
            warn!("Already asleep, ignoring sleep");
            self.discard_stale_commands().await;
            return;
        };
        let timings = self.config.timings.clone();

        session
            .work
            .dispatch(WorkMessage::SetMode {
                mode: DeviceMode::Idle,
                peer: session.peer,
            })
            .await;
        if self.critical {
            self.critical = false;
        } else {
            session
                .work
                .dispatch(WorkMessage::Narrate(NarrationEvent::Sleep))
                .await;
        }
        session.work.dispatch(WorkMessage::StopCompanions).await;
        session.work.wait_idle(timings.queue_drain_poll()).await;

        session.dispatcher_control.post(Control::Abort);
        match session.dispatcher.await {
            Ok(worker) => worker.companions.join(timings.shutdown_grace()).await,
            Err(e) => error!("Work dispatcher failed: {}", e),
        }
        self.discard_stale_commands().await;

        tokio::time::sleep(timings.shutdown_grace()).await;
        session.writer_control.post(Control::Abort);
        if let Err(e) = session.writer.await {
            error!("Output writer failed: {}", e);
        }

        self.awake.send_replace(false);
        info!("Asleep");
    }
}
