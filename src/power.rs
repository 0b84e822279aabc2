use std::{sync::Arc, time::Duration};

use log::{error, info, warn};
use tokio::sync::mpsc;

use crate::{
    config::PowerConfig,
    dispatch::DispatchHandle,
    lifecycle::LifecycleEvent,
    peripherals::{lock, PowerSensor, Shared},
    signal::{Control, Notification},
    PowerEvent, WorkMessage,
};

/// Highest raw battery reading.
pub const FULL_READING: u16 = 1023;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatteryAlert {
    Low,
    Critical,
}

/// Charger and battery bookkeeping, fed one reading at a time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatteryTracker {
    config: PowerConfig,
    connected: bool,
    /// Lowest battery reading since the charger was last unplugged
    minimum: u16,
    /// Polls left before the low prompt may repeat
    low_countdown: u8,
    critical_raised: bool,
}

impl BatteryTracker {
    pub fn new(config: PowerConfig) -> Self {
        Self {
            config,
            connected: false,
            minimum: FULL_READING,
            low_countdown: 0,
            critical_raised: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn minimum(&self) -> u16 {
        self.minimum
    }

    pub fn observe_charger(&mut self, reading: u16) -> Option<PowerEvent> {
        if !self.connected && reading > self.config.charger_threshold {
            self.connected = true;
            self.minimum = FULL_READING;
            Some(PowerEvent::AdapterConnected)
        } else if self.connected && reading < self.config.charger_threshold {
            self.connected = false;
            Some(PowerEvent::AdapterDisconnected)
        } else {
            None
        }
    }

    /// Only meaningful while running on battery. Critical is raised once.
    pub fn observe_battery(&mut self, reading: u16) -> Option<BatteryAlert> {
        self.minimum = self.minimum.min(reading);

        if self.minimum <= self.config.critical_bound {
            if self.critical_raised {
                return None;
            }
            self.critical_raised = true;
            Some(BatteryAlert::Critical)
        } else if self.minimum <= self.config.low_bound {
            if self.low_countdown == 0 {
                self.low_countdown = self.config.low_repeat_polls;
                Some(BatteryAlert::Low)
            } else {
                self.low_countdown -= 1;
                None
            }
        } else {
            None
        }
    }
}

/// Polls the power sensor and raises what it finds.
pub struct SensorTask {
    tracker: BatteryTracker,
    sensor: Shared<dyn PowerSensor>,
    work: DispatchHandle<WorkMessage>,
    lifecycle: mpsc::Sender<LifecycleEvent>,
    control: Arc<Notification<Control>>,
    poll: Duration,
}

impl SensorTask {
    pub fn new(
        config: PowerConfig,
        sensor: Shared<dyn PowerSensor>,
        work: DispatchHandle<WorkMessage>,
        lifecycle: mpsc::Sender<LifecycleEvent>,
        control: Arc<Notification<Control>>,
        poll: Duration,
    ) -> Self {
        Self {
            tracker: BatteryTracker::new(config),
            sensor,
            work,
            lifecycle,
            control,
            poll,
        }
    }

    pub async fn run(mut self) {
        info!("Sensor task started");
        loop {
            self.poll_once().await;
            if self.control.wait_timeout(self.poll).await == Some(Control::Abort) {
                break;
            }
        }
        info!("Sensor task stopped");
    }

    async fn poll_once(&mut self) {
        let charger = lock(&self.sensor).charger_level();
        let charger = match charger {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Charger reading failed: {}", e);
                return;
            }
        };
        if let Some(event) = self.tracker.observe_charger(charger) {
            info!("Power: {:?}", event);
            self.work.dispatch(WorkMessage::Power(event)).await;
        }
        if self.tracker.is_connected() {
            return;
        }

        let battery = lock(&self.sensor).battery_level();
        let battery = match battery {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Battery reading failed: {}", e);
                return;
            }
        };
        match self.tracker.observe_battery(battery) {
            Some(BatteryAlert::Critical) => {
                error!("Battery critical at {}, forcing shutdown", self.tracker.minimum());
                if self.lifecycle.send(LifecycleEvent::ForceShutdown).await.is_err() {
                    warn!("Lifecycle controller gone, cannot force shutdown");
                }
            }
            Some(BatteryAlert::Low) => {
                self.work
                    .dispatch(WorkMessage::Power(PowerEvent::LowBattery))
                    .await;
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dispatch::{self, WorkHandler},
        error::Result,
        peripherals::sim::SimPowerSensor,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn tracker() -> BatteryTracker {
        BatteryTracker::new(PowerConfig::default())
    }

    #[test]
    fn test_charger_edges() {
        let mut tracker = tracker();
        assert_eq!(tracker.observe_charger(100), None);
        assert_eq!(
            tracker.observe_charger(300),
            Some(PowerEvent::AdapterConnected)
        );
        assert_eq!(tracker.observe_charger(400), None);
        // Exactly at the threshold is neither edge
        assert_eq!(tracker.observe_charger(256), None);
        assert_eq!(
            tracker.observe_charger(10),
            Some(PowerEvent::AdapterDisconnected)
        );
    }

    #[test]
    fn test_connecting_resets_minimum() {
        let mut tracker = tracker();
        tracker.observe_battery(700);
        assert_eq!(tracker.minimum(), 700);
        tracker.observe_charger(300);
        assert_eq!(tracker.minimum(), FULL_READING);
    }

    #[test]
    fn test_low_battery_repeats_every_seventh_poll() {
        let mut tracker = tracker();
        let alerts: Vec<Option<BatteryAlert>> = (0..15).map(|_| tracker.observe_battery(580)).collect();
        let raised: Vec<usize> = alerts
            .iter()
            .enumerate()
            .filter(|(_, alert)| **alert == Some(BatteryAlert::Low))
            .map(|(poll, _)| poll)
            .collect();
        assert_eq!(raised, vec![0, 7, 14]);
    }

    #[test]
    fn test_minimum_is_sticky() {
        let mut tracker = tracker();
        assert_eq!(tracker.observe_battery(580), Some(BatteryAlert::Low));
        // A recovered reading does not lift the running minimum
        assert_eq!(tracker.observe_battery(900), None);
        assert_eq!(tracker.minimum(), 580);
    }

    #[test]
    fn test_critical_raised_once() {
        let mut tracker = tracker();
        assert_eq!(tracker.observe_battery(550), Some(BatteryAlert::Critical));
        assert_eq!(tracker.observe_battery(540), None);
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<WorkMessage>,
    }

    #[async_trait]
    impl WorkHandler<WorkMessage> for Recorder {
        async fn handle(&mut self, message: WorkMessage) -> Result<()> {
            self.seen.push(message);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_task_reports_events() {
        let sensor = Arc::new(Mutex::new(SimPowerSensor {
            charger: 500,
            battery: 1023,
        }));
        let (work, dispatcher) = dispatch::channel(10, Duration::from_millis(10));
        let dispatch_control = Arc::new(Notification::new());
        let consumer = tokio::spawn(dispatcher.run(Recorder::default(), dispatch_control.clone()));
        let (lifecycle, mut events) = mpsc::channel(4);
        let control = Arc::new(Notification::new());

        let task = tokio::spawn(
            SensorTask::new(
                PowerConfig::default(),
                sensor.clone(),
                work.clone(),
                lifecycle,
                control.clone(),
                Duration::from_secs(10),
            )
            .run(),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        {
            let mut sensor = sensor.lock().unwrap();
            sensor.charger = 0;
            sensor.battery = 500;
        }
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(events.recv().await, Some(LifecycleEvent::ForceShutdown));

        control.post(Control::Abort);
        task.await.unwrap();
        work.wait_idle(Duration::from_millis(1)).await;
        dispatch_control.post(Control::Abort);
        assert_eq!(
            consumer.await.unwrap().seen,
            vec![
                WorkMessage::Power(PowerEvent::AdapterConnected),
                WorkMessage::Power(PowerEvent::AdapterDisconnected),
            ]
        );
    }
}
