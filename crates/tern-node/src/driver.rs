//! Real-time driver
//!
//! Runs one [`RoutingNode`] on a tokio task. Commands arrive over an mpsc
//! channel, timers fire at wall-clock instants derived from the node's
//! [`SystemClock`], and every [`RoutingEvent`] the node records is
//! forwarded to an event channel.

use tern_core::{Datagram, Frame, LinkAck, LinkLayer, MacAddress, RoutingEvent, SystemClock, TopologyView};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{NodeError, NodeResult};
use crate::node::RoutingNode;

/// Capacity of the command channel
const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// Input to a driven node
#[derive(Debug, Clone)]
pub enum NodeCommand {
    /// Route an upper-layer datagram
    Send(Datagram),
    /// A frame addressed to the node, or broadcast
    Receive(Frame),
    /// A frame overheard while addressed to another node
    Overheard(Frame),
    LinkAck(LinkAck),
    TxError(MacAddress),
    /// Stop the driver and hand the node back
    Shutdown,
}

/// Handle to a node running on a tokio task
pub struct NodeHandle<T: TopologyView, L: LinkLayer> {
    commands: mpsc::Sender<NodeCommand>,
    task: JoinHandle<RoutingNode<SystemClock, T, L>>,
}

impl<T, L> NodeHandle<T, L>
where
    T: TopologyView + 'static,
    L: LinkLayer + 'static,
{
    /// A sender for feeding the node from other tasks
    pub fn commands(&self) -> mpsc::Sender<NodeCommand> {
        self.commands.clone()
    }

    pub async fn command(&self, command: NodeCommand) -> NodeResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| NodeError::ChannelClosed)
    }

    /// Hand a datagram to the node
    pub async fn send(&self, datagram: Datagram) -> NodeResult<()> {
        self.command(NodeCommand::Send(datagram)).await
    }

    /// Deliver a received frame to the node
    pub async fn deliver(&self, frame: Frame) -> NodeResult<()> {
        self.command(NodeCommand::Receive(frame)).await
    }

    /// Stop the driver and take the node back
    pub async fn shutdown(self) -> NodeResult<RoutingNode<SystemClock, T, L>> {
        // A closed channel means the task already stopped; join it anyway
        let _ = self.commands.send(NodeCommand::Shutdown).await;
        Ok(self.task.await?)
    }
}

/// Run `node` on a new tokio task
pub fn spawn<T, L>(
    node: RoutingNode<SystemClock, T, L>,
    events: mpsc::Sender<RoutingEvent>,
) -> NodeHandle<T, L>
where
    T: TopologyView + 'static,
    L: LinkLayer + 'static,
{
    let (commands, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let task = tokio::spawn(run(node, rx, events));
    NodeHandle { commands, task }
}

async fn run<T, L>(
    mut node: RoutingNode<SystemClock, T, L>,
    mut commands: mpsc::Receiver<NodeCommand>,
    events: mpsc::Sender<RoutingEvent>,
) -> RoutingNode<SystemClock, T, L>
where
    T: TopologyView,
    L: LinkLayer,
{
    info!(node = %node.address(), "node driver started");

    loop {
        let deadline = node
            .next_deadline()
            .map(|at| Instant::from_std(node.clock().instant_at(at)));

        tokio::select! {
            command = commands.recv() => match command {
                Some(NodeCommand::Shutdown) | None => break,
                Some(command) => apply(&mut node, command),
            },
            _ = wait_until(deadline) => {}
        }

        node.handle_timers();
        for event in node.drain_events() {
            if events.send(event).await.is_err() {
                debug!("event receiver dropped");
            }
        }
    }

    info!(node = %node.address(), "node driver stopped");
    node
}

fn apply<T: TopologyView, L: LinkLayer>(node: &mut RoutingNode<SystemClock, T, L>, command: NodeCommand) {
    match command {
        NodeCommand::Send(datagram) => {
            if let Err(reason) = node.send(datagram) {
                debug!(reason = %reason, "datagram rejected");
            }
        }
        NodeCommand::Receive(frame) => node.receive(frame),
        NodeCommand::Overheard(frame) => node.promiscuous_receive(frame),
        NodeCommand::LinkAck(ack) => node.link_ack(ack),
        NodeCommand::TxError(mac) => node.tx_error(mac),
        NodeCommand::Shutdown => {}
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
