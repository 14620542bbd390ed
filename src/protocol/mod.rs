//! GBN wire protocol: checksum, sequence numbers, and packet framing.

pub mod checksum;
pub mod packet;
pub mod seq;

pub use checksum::{checksum as compute_checksum, verify as verify_checksum};
pub use packet::{HEADER_SIZE, Packet};
pub use seq::Seq;
