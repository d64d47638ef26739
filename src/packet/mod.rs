pub mod attribute;
pub mod capability;
pub mod codec;
pub mod message;
#[cfg(test)]
pub(crate) mod mock;
pub mod prefix;
