//! `reldat` — a reliable byte-stream transport protocol over UDP.
//!
//! RELDAT recreates, at reduced scale, the core responsibilities of TCP:
//! connection establishment, in-order reliable delivery over a lossy
//! channel, flow control via an advertised window, and graceful teardown.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ send(bytes) / recv()
//!      ▼
//!  ┌───────────────────────────────────────┐
//!  │             Connection                │
//!  │  (state machine + control loop)       │
//!  │   ├── Packetizer   (slice outbound)   │
//!  │   ├── RetransmitSet (unacked timers)  │
//!  │   └── ReorderBuffer (inbound window)  │
//!  └────┬──────────────────────────────────┘
//!       │ Packet values
//!  ┌────▼──────┐    encode/decode    ┌──────────┐
//!  │  Socket   │◀───────────────────▶│  packet  │
//!  └────┬──────┘                     └──────────┘
//!       │ raw UDP datagrams
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     — wire format (serialise / deserialise, dual checksums)
//! - [`packetizer`] — outbound payload → window-bounded DATA packets
//! - [`reorder`]    — receive-side reorder buffer for one window
//! - [`retransmit`] — retransmission timer set for unacked packets
//! - [`connection`] — per-connection state machine and control loop
//! - [`socket`]     — async UDP capability (send / bounded-wait receive)
//! - [`simulator`]  — fault-injecting relay for lossy-channel testing

pub mod connection;
pub mod packet;
pub mod packetizer;
pub mod reorder;
pub mod retransmit;
pub mod simulator;
pub mod socket;
