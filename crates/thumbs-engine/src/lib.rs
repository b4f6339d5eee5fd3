//! Engine behind the thumbnail proxy: outbound transport profiles, the
//! quality race over candidate thumbnails, the egress health monitor and
//! optional image transcoding.

pub mod monitor;
pub mod resolver;
pub mod transcode;
pub mod transport;

pub use monitor::{HealthMonitor, HealthMonitorConfig, MonitorError};
pub use resolver::{QualityRaceResolver, Resolution, ResolveError};
pub use transcode::{ImageTransform, TranscodeError};
pub use transport::{
    HttpVersion, IpFamily, TransportConfig, TransportError, TransportProfile, build_profile,
};
