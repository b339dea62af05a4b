//! Node-style facade over bfs backends, plus mount-point routing.

mod config;
mod facade;
mod fd;
mod mountable;
mod normalize;
mod watch;

pub use config::{DEFAULT_FIRST_FD, FacadeConfig, MountConfig};
pub use facade::{Backend, Facade, defer};
pub use fd::Fd;
pub use mountable::MountableFileSystem;
pub use normalize::{Mode, TimeArg};
pub use watch::{WatchEvent, WatchEventKind, WatchListener, WatcherId};
