//! sendfile: point-to-point file transfer.
//! One peer listens, the other connects and sends a batch of files; each file is announced,
//! answered, streamed and hashed on both ends.

pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod integrity;
pub mod listener;
pub mod noise;
pub mod path;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod wire;

pub use channel::{Channel, ChunkObserver};
pub use config::{ReceiverConfig, SenderConfig, TransportConfig, DEFAULT_BUFFER_SIZE};
pub use crypto::{Keypair, PublicKey};
pub use error::{TransferError, TransportError};
pub use integrity::{HashAlgorithm, UnknownAlgorithm};
pub use listener::{Listener, ServeSummary, SessionPolicy};
pub use noise::{NoNoise, NoiseStrategy, RandomPadding};
pub use path::PathError;
pub use protocol::{Answer, FileRequest, ProtocolError, PROTOCOL_VERSION};
pub use session::{
    run_receiver, send_files, send_to, serve_connection, NoopObserver, SessionObserver,
    SessionReport, SessionRole, TransferOutcome,
};
pub use transport::{connect, SecureChannel};
pub use wire::{decode_frame, encode_frame, FrameError};
