//! IPC server for host application communication

pub mod protocol;
pub mod server;

pub use server::IpcServer;
