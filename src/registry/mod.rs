//! Who's online: peers seen over the mesh, and MCP agents connected to
//! this daemon (spec §3.7, §4.10).

pub mod agent;
pub mod peer;

pub use self::agent::{AgentRegistry, AgentState};
pub use self::peer::{PeerRegistry, PeerState};
