mod adapter;
mod shm;

pub use adapter::DeviceAdapter;
pub use shm::ShmAdapter;
