pub mod allocator;
pub mod codec;
pub mod driver;
pub mod election;
pub mod error;
pub mod id;
pub mod isolation;
pub mod master;
pub mod message;
pub mod net;
pub mod resource;
pub mod slave;
