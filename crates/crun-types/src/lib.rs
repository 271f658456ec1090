pub mod config;
pub mod container;
pub mod endpoint;
pub mod event;

pub use config::{ClientConfig, PoolConfig, QueueConfig, RetryConfig};
pub use container::{
    ContainerSnapshot, ContainerSpec, ContainerStatus, MountType, PortMapping, Protocol,
    RestartPolicy, VolumeMount,
};
pub use endpoint::{Endpoint, EndpointParseError};
pub use event::{Event, EventFilter, EventType, LogOptions, LogRecord, LogStreamKind};
