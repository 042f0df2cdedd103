//! Store-and-forward delivery
//!
//! Messages that need guaranteed delivery are persisted into a
//! [`MessageStore`]. A [`MessageProcessor`] drains the store on a fixed
//! interval, retries failed deliveries and finally moves exhausted messages to
//! a dead-letter store, which operators manage through a
//! [`DeadLetterChannelView`].

pub mod dead_letter;
pub mod file;
pub mod mediator;
pub mod memory;
pub mod priority;
pub mod processor;
pub mod registry;
pub mod store;

pub use dead_letter::DeadLetterChannelView;
pub use file::FileMessageStore;
pub use mediator::{register_store_mediator, StoreMediator};
pub use memory::InMemoryMessageStore;
pub use priority::PriorityMessageStore;
pub use processor::{DeliveryOutcome, MessageProcessor, ProcessorConfig, ProcessorStatus};
pub use registry::ProcessorRegistry;
pub use store::MessageStore;

pub use esb_common::StoreError;
