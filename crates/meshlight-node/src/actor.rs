//! Per-node actor
//!
//! [`LightHandle::spawn`] moves a [`LightNode`] into its own task. Commands
//! from handles, unsolicited status messages from the mesh client and
//! availability probes from the poll timer are all funnelled through that
//! task, so the node's cache and availability state are only ever written
//! by one caller at a time.

use meshlight_access::{CtlStatus, InboundMessage, LightnessStatus, MeshClient, OnOffStatus, Opcode, RangeStatus};
use meshlight_core::{Availability, Capability, StateChange, TemperatureEncoding, UnicastAddress};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::node::{LightNode, NodeSnapshot};

const COMMAND_CAPACITY: usize = 32;
const INBOUND_CAPACITY: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("Node {0} has shut down")]
    Closed(UnicastAddress),
}

pub type Result<T> = std::result::Result<T, NodeError>;

enum Command {
    SetOnOff {
        onoff: bool,
        ack: bool,
        done: oneshot::Sender<()>,
    },
    SetBrightness {
        level: u32,
        ack: bool,
        done: oneshot::Sender<()>,
    },
    SetTemperature {
        kelvin: u32,
        ack: bool,
        done: oneshot::Sender<()>,
    },
    SetTemperatureFromMired {
        mired: u32,
        ack: bool,
        encoding: Option<TemperatureEncoding>,
        done: oneshot::Sender<()>,
    },
    SetCtl {
        temperature: Option<u32>,
        brightness: Option<u32>,
        encoding: TemperatureEncoding,
        ack: bool,
        done: oneshot::Sender<()>,
    },
    Refresh {
        done: oneshot::Sender<()>,
    },
    GetOnOff {
        reply: oneshot::Sender<Option<OnOffStatus>>,
    },
    GetLightness {
        reply: oneshot::Sender<Option<LightnessStatus>>,
    },
    GetLightnessRange {
        reply: oneshot::Sender<Option<RangeStatus>>,
    },
    GetCtl {
        reply: oneshot::Sender<Option<CtlStatus>>,
    },
    GetCtlTemperatureRange {
        reply: oneshot::Sender<Option<RangeStatus>>,
    },
    Probe {
        reply: oneshot::Sender<Availability>,
    },
    Snapshot {
        reply: oneshot::Sender<NodeSnapshot>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running light node.
///
/// The node task stops when [`LightHandle::shutdown`] is called or the last
/// handle is dropped.
#[derive(Clone)]
pub struct LightHandle {
    unicast: UnicastAddress,
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<StateChange>,
}

impl LightHandle {
    /// Start the node task. The node binds first, then subscribes to the
    /// status messages of its capabilities and starts polling availability
    /// once the client is ready. Commands sent meanwhile are queued.
    pub fn spawn(node: LightNode) -> Self {
        let unicast = node.unicast();
        let events = node.events();
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);

        let poll_tx = tx.downgrade();
        tokio::spawn(run(node, rx, poll_tx));

        Self { unicast, tx, events }
    }

    pub fn unicast(&self) -> UnicastAddress {
        self.unicast
    }

    /// Subscribe to the node's change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| NodeError::Closed(self.unicast))?;
        reply_rx.await.map_err(|_| NodeError::Closed(self.unicast))
    }

    pub async fn turn_on(&self, ack: bool) -> Result<()> {
        self.request(|done| Command::SetOnOff { onoff: true, ack, done }).await
    }

    pub async fn turn_off(&self, ack: bool) -> Result<()> {
        self.request(|done| Command::SetOnOff { onoff: false, ack, done }).await
    }

    pub async fn set_brightness(&self, level: u32, ack: bool) -> Result<()> {
        self.request(|done| Command::SetBrightness { level, ack, done }).await
    }

    pub async fn set_temperature(&self, kelvin: u32, ack: bool) -> Result<()> {
        self.request(|done| Command::SetTemperature { kelvin, ack, done }).await
    }

    /// Set temperature from mireds. Without an explicit encoding the node's
    /// configured one is used.
    pub async fn set_temperature_from_mired(
        &self,
        mired: u32,
        ack: bool,
        encoding: Option<TemperatureEncoding>,
    ) -> Result<()> {
        self.request(|done| Command::SetTemperatureFromMired {
            mired,
            ack,
            encoding,
            done,
        })
        .await
    }

    pub async fn set_ctl(
        &self,
        temperature: Option<u32>,
        brightness: Option<u32>,
        encoding: TemperatureEncoding,
        ack: bool,
    ) -> Result<()> {
        self.request(|done| Command::SetCtl {
            temperature,
            brightness,
            encoding,
            ack,
            done,
        })
        .await
    }

    pub async fn refresh_state(&self) -> Result<()> {
        self.request(|done| Command::Refresh { done }).await
    }

    pub async fn get_onoff(&self) -> Result<Option<OnOffStatus>> {
        self.request(|reply| Command::GetOnOff { reply }).await
    }

    pub async fn get_lightness(&self) -> Result<Option<LightnessStatus>> {
        self.request(|reply| Command::GetLightness { reply }).await
    }

    pub async fn get_lightness_range(&self) -> Result<Option<RangeStatus>> {
        self.request(|reply| Command::GetLightnessRange { reply }).await
    }

    pub async fn get_ctl(&self) -> Result<Option<CtlStatus>> {
        self.request(|reply| Command::GetCtl { reply }).await
    }

    pub async fn get_ctl_temperature_range(&self) -> Result<Option<RangeStatus>> {
        self.request(|reply| Command::GetCtlTemperatureRange { reply }).await
    }

    /// Probe availability now, outside the poll schedule
    pub async fn probe_availability(&self) -> Result<Availability> {
        self.request(|reply| Command::Probe { reply }).await
    }

    pub async fn snapshot(&self) -> Result<NodeSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn supports(&self, capability: Capability) -> Result<bool> {
        Ok(self.snapshot().await?.capabilities.contains(capability))
    }

    /// Stop the node task and its poll loop
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|done| Command::Shutdown { done }).await
    }
}

async fn run(mut node: LightNode, mut rx: mpsc::Receiver<Command>, poll_tx: mpsc::WeakSender<Command>) {
    let unicast = node.unicast();
    node.bind().await;

    let client = node.client();
    let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let mut tasks: Vec<JoinHandle<()>> = node
        .status_opcodes()
        .into_iter()
        .map(|opcode| tokio::spawn(forward(opcode, client.subscribe(opcode), inbound_tx.clone())))
        .collect();
    drop(inbound_tx);

    let interval = Duration::from_secs(node.config().poll_interval_secs);
    tasks.push(tokio::spawn(poll(client, poll_tx, interval, unicast)));

    info!(unicast = %unicast, name = %node.name(), "Light node running");

    let shutdown = loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Shutdown { done }) => break Some(done),
                Some(command) => execute(&mut node, command).await,
                None => break None,
            },
            Some(inbound) = inbound_rx.recv() => {
                node.handle_inbound(&inbound);
            }
        }
    };

    for task in &tasks {
        task.abort();
    }
    drop(rx);
    info!(unicast = %unicast, "Light node stopped");

    if let Some(done) = shutdown {
        let _ = done.send(());
    }
}

async fn execute(node: &mut LightNode, command: Command) {
    // A dropped reply receiver only means the caller stopped waiting
    match command {
        Command::SetOnOff { onoff, ack, done } => {
            node.set_onoff(onoff, ack).await;
            let _ = done.send(());
        }
        Command::SetBrightness { level, ack, done } => {
            node.set_brightness(level, ack).await;
            let _ = done.send(());
        }
        Command::SetTemperature { kelvin, ack, done } => {
            node.set_temperature(kelvin, ack).await;
            let _ = done.send(());
        }
        Command::SetTemperatureFromMired {
            mired,
            ack,
            encoding,
            done,
        } => {
            let encoding = encoding.unwrap_or(node.config().temperature_encoding);
            node.set_temperature_from_mired(mired, ack, encoding).await;
            let _ = done.send(());
        }
        Command::SetCtl {
            temperature,
            brightness,
            encoding,
            ack,
            done,
        } => {
            node.set_ctl(temperature, brightness, encoding, ack).await;
            let _ = done.send(());
        }
        Command::Refresh { done } => {
            node.refresh_state().await;
            let _ = done.send(());
        }
        Command::GetOnOff { reply } => {
            let _ = reply.send(node.get_onoff().await);
        }
        Command::GetLightness { reply } => {
            let _ = reply.send(node.get_lightness().await);
        }
        Command::GetLightnessRange { reply } => {
            let _ = reply.send(node.get_lightness_range().await);
        }
        Command::GetCtl { reply } => {
            let _ = reply.send(node.get_ctl().await);
        }
        Command::GetCtlTemperatureRange { reply } => {
            let _ = reply.send(node.get_ctl_temperature_range().await);
        }
        Command::Probe { reply } => {
            let _ = reply.send(node.probe_availability().await);
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(node.snapshot());
        }
        Command::Shutdown { done } => {
            let _ = done.send(());
        }
    }
}

/// Relay one subscription into the node's inbound queue
async fn forward(
    opcode: Opcode,
    mut subscription: broadcast::Receiver<InboundMessage>,
    inbound_tx: mpsc::Sender<InboundMessage>,
) {
    debug!(opcode = opcode.value(), "Subscribed to status messages");
    loop {
        match subscription.recv().await {
            Ok(inbound) => {
                if inbound_tx.send(inbound).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    opcode = opcode.value(),
                    skipped = skipped,
                    "Inbound status messages dropped"
                );
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Availability poll loop. Holds only a weak sender so it never keeps the
/// node alive on its own.
async fn poll(
    client: Arc<dyn MeshClient>,
    tx: mpsc::WeakSender<Command>,
    interval: Duration,
    unicast: UnicastAddress,
) {
    client.wait_ready().await;
    debug!(unicast = %unicast, interval_secs = interval.as_secs(), "Availability polling started");

    loop {
        let Some(tx) = tx.upgrade() else { break };
        let (reply, probed) = oneshot::channel();
        if tx.send(Command::Probe { reply }).await.is_err() {
            break;
        }
        drop(tx);

        match probed.await {
            Ok(availability) => debug!(unicast = %unicast, availability = %availability, "Polled availability"),
            Err(_) => break,
        }
        tokio::time::sleep(interval).await;
    }
}
