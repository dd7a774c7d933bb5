pub mod message;

pub use message::{Message, OutboundMessage, User, JOINED_THE_ROOM, LEFT_THE_ROOM};
