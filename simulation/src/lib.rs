//! # Tern Simulation
//!
//! A discrete-event simulation of DSR routing over mobile ad-hoc meshes.
//!
//! ## Overview
//!
//! Each node of a [`Mesh`] runs the real [`RoutingNode`](tern_node::RoutingNode)
//! state machine. The simulation plays the part of the medium and of every
//! node's clock:
//!
//! - **Virtual time**: all nodes share one [`ManualClock`](tern_core::ManualClock)
//!   that jumps to the next frame arrival or timer deadline
//! - **Broadcast and unicast**: frames reach mesh neighbors after a fixed delay
//! - **Overhearing**: neighbors of a unicast transmitter get the frame promiscuously
//! - **Link feedback**: optional link-layer acks and transmit failures
//! - **Mobility**: links come up and go down mid-run
//!
//! ## Architecture
//!
//! - **Topology** (`topology.rs`): Mesh construction (line, ring, grid, random, etc.)
//! - **Simulation** (`simulation.rs`): Discrete-event engine and simulated link layer
//! - **Scenarios** (`scenarios.rs`): Pre-built scenarios
//!
//! ## Example: Route Discovery
//!
//! ```rust,ignore
//! use tern_simulation::*;
//!
//! // 0 - 1 - 2
//! let mesh = MeshBuilder::new(3).line();
//! let mut sim = Simulation::new(mesh, SimConfig::default());
//!
//! let id = sim.send(Address::from_index(0), Address::from_index(2), b"hi".to_vec())?;
//! sim.run_for(Duration::from_secs(2));
//!
//! assert!(sim.was_delivered(id));
//! ```

pub mod scenarios;
pub mod simulation;
pub mod topology;

pub use simulation::{
    SIM_PROTOCOL, SimConfig, SimError, SimEvent, SimLink, SimNode, SimResult, SimStats,
    Simulation,
};
pub use topology::{Mesh, MeshBuilder, from_edges};

// Re-export core types for scripting scenarios
pub use tern_core::{Address, RoutingEvent, Timestamp};
