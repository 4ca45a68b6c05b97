//! Pre-defined simulation scenarios for Tern
//!
//! Each scenario builds a mesh, drives a [`Simulation`] through a short
//! script and returns it so callers can inspect events and statistics.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tern_core::{Address, RoutingEvent};
use tern_routing::CacheType;
use tracing::info;

use crate::simulation::{SimConfig, Simulation};
use crate::topology::{MeshBuilder, from_edges};

fn node(index: u16) -> Address {
    Address::from_index(index)
}

fn print_stats(sim: &Simulation) {
    let stats = &sim.stats;
    println!("\n=== Final Statistics ===");
    println!("  Datagrams sent: {}", stats.originated);
    println!("  Datagrams delivered: {}", stats.delivered);
    println!("  Packets dropped: {}", stats.dropped);
    println!("  Routes discovered: {}", stats.routes_discovered);
    println!("  Route errors sent: {}", stats.route_errors);
    println!("  Link breaks: {}", stats.link_breaks);
    println!("  Salvaged: {}", stats.salvaged);
    println!("  Frames sent: {} ({} lost)", stats.frames_sent, stats.frames_lost);
    println!("  Delivery rate: {:.1}%", stats.delivery_ratio() * 100.0);
    if let Some(latency) = stats.average_latency() {
        println!("  Average latency: {:?}", latency);
    }
}

/// Scenario: Route discovery across a line
///
/// ```text
/// 0 - 1 - 2 - 3 - 4
/// ```
///
/// Node 0 sends to node 4 with an empty cache. The one-hop probe fails, a
/// propagating request floods the line and node 4 replies with the route.
/// A second datagram then goes out straight from the cache.
pub fn run_line_discovery_scenario() -> Simulation {
    info!("=== Running Line Discovery Scenario ===");

    let mesh = MeshBuilder::new(5).line();
    println!("{}", mesh.visualize());

    let mut sim = Simulation::new(mesh, SimConfig::default());

    println!("\n--- 0 sends to 4 (empty route cache) ---");
    if let Err(e) = sim.send(node(0), node(4), b"first".to_vec()) {
        println!("  send failed: {}", e);
    }
    sim.run_for(Duration::from_secs(3));
    println!("  {}", sim.state_summary());

    println!("\n--- 0 sends to 4 again (cached route) ---");
    if let Err(e) = sim.send(node(0), node(4), b"second".to_vec()) {
        println!("  send failed: {}", e);
    }
    sim.run_for(Duration::from_secs(1));
    println!("  {}", sim.state_summary());

    print_stats(&sim);
    sim
}

/// Scenario: A link on an established route breaks
///
/// ```text
/// 0 - 1 - 2 - 3
/// ```
///
/// After a first delivery the 1-2 link goes down without any link-layer
/// feedback. Node 1 retransmits until its retries run out, declares the
/// link broken and sends a route error back to node 0, which has no other
/// way to reach node 3.
pub fn run_broken_link_scenario() -> Simulation {
    info!("=== Running Broken Link Scenario ===");

    let mesh = MeshBuilder::new(4).line();
    println!("{}", mesh.visualize());

    let mut config = SimConfig {
        tx_errors: false,
        ..Default::default()
    };
    config.node.maintenance.passive_acknowledgment = false;
    let mut sim = Simulation::new(mesh, config);

    println!("\n--- 0 sends to 3 ---");
    if let Err(e) = sim.send(node(0), node(3), b"before".to_vec()) {
        println!("  send failed: {}", e);
    }
    sim.run_for(Duration::from_secs(2));
    println!("  {}", sim.state_summary());

    println!("\n--- Link 1-2 goes down ---");
    if let Err(e) = sim.link_down(node(1), node(2)) {
        println!("  link down failed: {}", e);
    }

    println!("\n--- 0 sends to 3 over the stale route ---");
    if let Err(e) = sim.send(node(0), node(3), b"after".to_vec()) {
        println!("  send failed: {}", e);
    }
    sim.run_for(Duration::from_secs(2));
    println!("  {}", sim.state_summary());

    for event in sim.events_at(node(1)) {
        if let RoutingEvent::RouteErrorSent {
            unreachable,
            error_destination,
            ..
        } = event
        {
            println!("  1 reported {} unreachable to {}", unreachable, error_destination);
        }
    }

    print_stats(&sim);
    sim
}

/// Scenario: An intermediate node salvages a packet
///
/// ```text
///     2
///    / \
/// 0 - 1   4
///    \ /
///     3
/// ```
///
/// Node 1 knows both ways to node 4. Once node 0 has a route, the link
/// from node 1 to the next hop on that route goes down; node 1 re-issues
/// the packet along the other branch.
pub fn run_salvage_scenario() -> Simulation {
    info!("=== Running Salvage Scenario ===");

    let mesh = from_edges(&[(0, 1), (1, 2), (2, 4), (1, 3), (3, 4)]);
    println!("{}", mesh.visualize());

    let mut sim = Simulation::new(mesh, SimConfig::default());
    seed_route(&mut sim, &[1, 2, 4]);
    seed_route(&mut sim, &[1, 3, 4]);

    println!("\n--- 0 sends to 4 ---");
    if let Err(e) = sim.send(node(0), node(4), b"discover".to_vec()) {
        println!("  send failed: {}", e);
    }
    sim.run_for(Duration::from_secs(3));
    println!("  {}", sim.state_summary());

    let now = sim.now();
    let route = sim
        .node_mut(node(0))
        .and_then(|n| n.route_cache_mut().lookup(node(4), now))
        .map(|entry| entry.into_path())
        .unwrap_or_default();
    println!("  0 routes to 4 via {:?}", route);

    if let Some(branch) = route.get(2).copied() {
        println!("\n--- Link 1-{} goes down ---", branch);
        if let Err(e) = sim.link_down(node(1), branch) {
            println!("  link down failed: {}", e);
        }
    }

    println!("\n--- 0 sends to 4 again ---");
    if let Err(e) = sim.send(node(0), node(4), b"salvage me".to_vec()) {
        println!("  send failed: {}", e);
    }
    sim.run_for(Duration::from_secs(3));
    println!("  {}", sim.state_summary());

    print_stats(&sim);
    sim
}

fn seed_route(sim: &mut Simulation, path: &[u16]) {
    let now = sim.now();
    let path: Vec<Address> = path.iter().copied().map(node).collect();
    if let Some(first) = sim.node_mut(path[0]) {
        first.route_cache_mut().add_path(&path, now);
    }
}

/// Scenario: A shortcut appears on an active route
///
/// ```text
/// 0 - 1 - 2 - 3      then      0 - 1 - 2 - 3
///                               \______/
/// ```
///
/// Node 2 moves into range of node 0. Overhearing node 0 transmit a
/// packet whose route runs through node 1 first, node 2 sends node 0 a
/// gratuitous reply with the shorter route.
pub fn run_shortcut_scenario() -> Simulation {
    info!("=== Running Shortcut Scenario ===");

    let mesh = MeshBuilder::new(4).line();
    println!("{}", mesh.visualize());

    let mut sim = Simulation::new(mesh, SimConfig::default());

    println!("\n--- 0 sends to 3 ---");
    if let Err(e) = sim.send(node(0), node(3), b"long way".to_vec()) {
        println!("  send failed: {}", e);
    }
    sim.run_for(Duration::from_secs(3));
    println!("  {}", sim.state_summary());

    println!("\n--- Link 0-2 comes up ---");
    if let Err(e) = sim.link_up(node(0), node(2)) {
        println!("  link up failed: {}", e);
    }

    println!("\n--- 0 sends to 3 again ---");
    if let Err(e) = sim.send(node(0), node(3), b"short way".to_vec()) {
        println!("  send failed: {}", e);
    }
    sim.run_for(Duration::from_secs(2));
    println!("  {}", sim.state_summary());

    let now = sim.now();
    if let Some(route) = sim
        .node_mut(node(0))
        .and_then(|n| n.route_cache_mut().lookup(node(3), now))
    {
        println!("  0 now routes to 3 in {} hops", route.hops());
    }

    print_stats(&sim);
    sim
}

/// Scenario: Partition and heal
///
/// Two triangles joined by the 2-3 link. Node 0 sends to node 5 while the
/// bridge is down; the packet waits in the send buffer while discovery
/// backs off, and is delivered once the bridge comes back.
pub fn run_partition_scenario() -> Simulation {
    info!("=== Running Partition Scenario ===");

    let mesh = from_edges(&[(0, 1), (0, 2), (1, 2), (3, 4), (3, 5), (4, 5), (2, 3)]);
    println!("{}", mesh.visualize());

    let mut sim = Simulation::new(mesh, SimConfig::default());

    println!("\n--- Bridge 2-3 goes down (partition) ---");
    if let Err(e) = sim.link_down(node(2), node(3)) {
        println!("  link down failed: {}", e);
    }

    println!("\n--- 0 sends to 5 (partitioned) ---");
    if let Err(e) = sim.send(node(0), node(5), b"across the gap".to_vec()) {
        println!("  send failed: {}", e);
    }
    sim.run_for(Duration::from_secs(3));
    println!("  {}", sim.state_summary());
    println!("  (Should be buffered, not delivered)");

    println!("\n--- Bridge reconnects ---");
    if let Err(e) = sim.link_up(node(2), node(3)) {
        println!("  link up failed: {}", e);
    }
    sim.run_for(Duration::from_secs(20));
    println!("  {}", sim.state_summary());

    print_stats(&sim);
    sim
}

/// Scenario: Random flows over a random mesh
///
/// Every 200ms a random node sends to another random node for the first
/// half of the run; the second half lets outstanding discoveries finish.
pub fn run_random_flows_scenario(
    nodes: u16,
    connection_probability: f64,
    seconds: u64,
    cache: CacheType,
    seed: u64,
) -> Simulation {
    info!(
        nodes,
        seconds,
        ?cache,
        seed,
        "=== Running Random Flows Scenario ==="
    );

    let mesh = MeshBuilder::new(nodes).random(connection_probability, seed);
    println!("{}", mesh.visualize());

    let mut config = SimConfig {
        seed,
        ..Default::default()
    };
    config.node.route_cache.cache_type = cache;
    let mut sim = Simulation::new(mesh, config);

    let mut rng = StdRng::seed_from_u64(seed);
    let span = Duration::from_secs(seconds) / 2;
    let interval = Duration::from_millis(200);
    let mut at = sim.now();
    let end = at + span;
    while nodes > 1 && at < end {
        let from = rng.random_range(0..nodes);
        let to = rng.random_range(0..nodes);
        if from != to {
            let payload = format!("{} -> {} at {}", from, to, at).into_bytes();
            if let Err(e) = sim.send_at(at, node(from), node(to), payload) {
                println!("  could not schedule {} -> {}: {}", from, to, e);
            }
        }
        at += interval;
    }

    sim.run_for(Duration::from_secs(seconds));
    print_stats(&sim);
    sim
}
