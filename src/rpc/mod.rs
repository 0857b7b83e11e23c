//! C6: RPC layer — message shapes, sequence-number discipline, the
//! pluggable peer proxy, the pending-request table, and failed-RPC
//! handling (spec §4.5/§6).

pub mod failed;
pub mod messages;
pub mod pending;
pub mod proxy;
pub mod sequence;

pub use failed::{classify_error, handle_failed_rpc, FailedRpc, FailedRpcKind, FailedRpcOutcome};
pub use messages::{Envelope, PeerMessage, ReservationPayload};
pub use pending::{PendingRequest, PendingTable};
pub use proxy::{LocalProxy, Proxy};
pub use sequence::{classify, SequenceOutcome};
