mod handle;
mod region;
pub(crate) mod staging;

pub use handle::PeerHandle;
pub use region::SharedRegion;
