//! Command Channel
//!
//! Every sensor command is a write to the UART write characteristic
//! followed by one or more notifications on the notify characteristic.
//! The characteristic pair only supports one outstanding exchange, so a
//! device must be leased before anything is written to it.

use crate::domain::models::{Notification, RawFrame, TypedDevice};
use crate::error::{ParseError, Result, SensorError, TransportError};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::Transport;
use crate::infrastructure::codec::Codec;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace, warn};

/// How collection of a reply ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Collect until a notification without payload arrives
    EndOfStream,
    /// The first payload is the whole reply
    FirstFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Subscribed,
    AwaitingFirstFrame,
    Collecting,
    Finalizing,
}

/// Outcome of feeding one notification to a [`FrameCollector`].
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Complete(Vec<RawFrame>),
    /// Single-frame exchange got no payload
    NoPayload,
}

/// Accumulates notification frames for one exchange.
#[derive(Debug)]
pub struct FrameCollector {
    termination: Termination,
    state: ChannelState,
    frames: Vec<RawFrame>,
}

impl FrameCollector {
    pub fn new(termination: Termination) -> Self {
        Self {
            termination,
            state: ChannelState::Idle,
            frames: Vec::new(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    fn transition(&mut self, next: ChannelState) {
        trace!("Channel state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub fn subscribed(&mut self) {
        self.transition(ChannelState::Subscribed);
    }

    pub fn command_written(&mut self) {
        self.transition(ChannelState::AwaitingFirstFrame);
    }

    /// Feed the next item from the subscription. A stream error or a
    /// closed stream carries no payload, same as an empty notification.
    pub fn push(&mut self, event: Option<std::result::Result<Notification, TransportError>>) -> Step {
        let frame = match event {
            Some(Ok(notification)) => notification.into_frame(),
            Some(Err(e)) => {
                warn!("Notification error treated as end of stream: {}", e);
                None
            }
            None => None,
        };

        match (frame, self.termination) {
            (Some(frame), Termination::FirstFrame) => {
                self.transition(ChannelState::Finalizing);
                Step::Complete(vec![frame])
            }
            (Some(frame), Termination::EndOfStream) => {
                if self.state == ChannelState::AwaitingFirstFrame {
                    self.transition(ChannelState::Collecting);
                }
                self.frames.push(frame);
                Step::Continue
            }
            (None, Termination::EndOfStream) => {
                self.transition(ChannelState::Finalizing);
                Step::Complete(std::mem::take(&mut self.frames))
            }
            (None, Termination::FirstFrame) => {
                self.transition(ChannelState::Finalizing);
                Step::NoPayload
            }
        }
    }
}

/// Serialises commands per device over a shared transport.
pub struct CommandChannel {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl CommandChannel {
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<dyn Codec>) -> Self {
        Self {
            transport,
            codec,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Reserve `device_id` for one command. Fails with
    /// [`SensorError::DeviceBusy`] while another lease is alive.
    pub fn acquire(&self, device_id: &str) -> Result<ChannelLease<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(device_id.to_string()) {
            warn!("Rejected command for {}: another command is in flight", device_id);
            return Err(SensorError::DeviceBusy(device_id.to_string()));
        }
        Ok(ChannelLease {
            channel: self,
            device_id: device_id.to_string(),
        })
    }

    pub fn is_busy(&self, device_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(device_id)
    }

    /// Subscribe, write, collect. The subscription is torn down on every
    /// path out of here, including the future being dropped.
    async fn exchange(
        &self,
        device: &TypedDevice,
        command: &str,
        termination: Termination,
    ) -> Result<Vec<RawFrame>> {
        let device_type = device.device_type;
        let mut collector = FrameCollector::new(termination);

        // Subscribe first: the sensor may answer before the write call returns
        let mut subscription = self
            .transport
            .monitor(
                &device.id,
                device_type.service_uuid(),
                device_type.notify_characteristic_uuid(),
            )
            .await?;
        collector.subscribed();

        debug!("Writing {:?} to {}", command, device.id);
        let payload = protocol::encode_command(self.codec.as_ref(), command);
        if let Err(e) = self
            .transport
            .write_without_response(
                &device.id,
                device_type.service_uuid(),
                device_type.write_characteristic_uuid(),
                &payload,
            )
            .await
        {
            subscription.unsubscribe();
            return Err(e.into());
        }
        collector.command_written();

        let outcome = loop {
            match collector.push(subscription.next().await) {
                Step::Continue => continue,
                Step::Complete(frames) => break Ok(frames),
                Step::NoPayload => {
                    break Err(SensorError::CommandFailed {
                        command: command.to_string(),
                    })
                }
            }
        };

        subscription.unsubscribe();
        outcome
    }
}

/// Exclusive right to run one command against a device. Released on drop.
pub struct ChannelLease<'a> {
    channel: &'a CommandChannel,
    device_id: String,
}

impl ChannelLease<'_> {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// A lease only covers the device it was acquired for.
    fn check_device(&self, device: &TypedDevice) -> Result<()> {
        if device.id != self.device_id {
            warn!(
                "Lease for {} cannot run a command on {}",
                self.device_id, device.id
            );
            return Err(SensorError::DeviceBusy(device.id.clone()));
        }
        Ok(())
    }

    /// Multi-frame exchange: collect until the end-of-stream marker, then
    /// decode the whole sequence.
    pub async fn write_and_collect<T, D>(
        &self,
        device: &TypedDevice,
        command: &str,
        decode: D,
    ) -> Result<T>
    where
        D: FnOnce(&[RawFrame]) -> std::result::Result<T, ParseError>,
    {
        self.check_device(device)?;
        let frames = self
            .channel
            .exchange(device, command, Termination::EndOfStream)
            .await?;
        debug!("Collected {} frames for {:?}", frames.len(), command);
        Ok(decode(&frames)?)
    }

    /// Single-frame exchange: the first payload is the reply.
    pub async fn write_with_single_response<T, D>(
        &self,
        device: &TypedDevice,
        command: &str,
        decode: D,
    ) -> Result<T>
    where
        D: FnOnce(&RawFrame) -> std::result::Result<T, ParseError>,
    {
        self.check_device(device)?;
        let frames = self
            .channel
            .exchange(device, command, Termination::FirstFrame)
            .await?;
        match frames.first() {
            Some(frame) => Ok(decode(frame)?),
            None => Err(SensorError::CommandFailed {
                command: command.to_string(),
            }),
        }
    }
}

impl Drop for ChannelLease<'_> {
    fn drop(&mut self) {
        self.channel
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.device_id);
    }
}
