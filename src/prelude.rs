//! Convenience re-exports for downstream callers and `src/bin/strp_node.rs`,
//! teacher-style (the teacher's own `prelude.rs` re-exports its core traits
//! and config types for its demo binaries).

pub use crate::error::NetError;
pub use crate::mac::{Mac, MacConfig};
pub use crate::neighbor::{BROADCAST_ADDR, NeighbourEntry, NeighbourTable};
pub use crate::node::Node;
pub use crate::protomon::ProtoMon;
pub use crate::radio::{Radio, RadioMode};
pub use crate::routing::{LoopPolicy, ParentStrategy, RoutingConfig, RoutingRecvHeader, Strp};
pub use crate::timer::{SystemTimer, Timer};
pub use crate::{Address, MacVariant, NodeConfig};
