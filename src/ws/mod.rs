pub mod rooms;

pub use rooms::{RoomRegistry, RoomStats};
