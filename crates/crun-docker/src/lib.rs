mod api;
pub mod codec;
pub mod containers;
pub mod error;
pub mod events;
pub mod exec;
pub mod images;
pub mod logs;
pub mod models;
pub mod networks;
mod streams;
pub mod system;
pub mod transport;
pub mod volumes;

pub use containers::ContainerClient;
pub use error::{CodecError, DockerError, Result, StreamError, TransportError};
pub use events::{EventStream, EventSubscriber};
pub use exec::{ExecClient, ExecOutput};
pub use images::{ImageClient, PullProgressStream};
pub use logs::{FrameDecoder, LogStream, LogStreamer};
pub use networks::NetworkClient;
pub use system::SystemClient;
pub use transport::{Method, Request, Response, StreamSession, Transport};
pub use volumes::VolumeClient;
