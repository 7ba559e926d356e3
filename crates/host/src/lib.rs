pub mod client;
pub mod fanout;
pub mod mixer;
pub mod participant;
pub mod registry;

pub use client::{ClientEvent, ClientRecord, ClientState, DropOldestQueue, ShortIdPool};
pub use fanout::{fan_out_media_frame, run_client_writer};
pub use mixer::{FrameMixer, NullMixer};
pub use participant::{accept_handshake, join_as_participant, JoinedSession};
pub use registry::ClientRegistry;
