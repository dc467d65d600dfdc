//! Actor components for the build-server connection.
//!
//! # Components
//!
//! - `Reader`: Background task that decodes inbound frames and hands them to the dispatcher
//! - `Writer`: Background task that writes queued envelopes and acknowledges each write

mod outbound_message;
mod reader;
mod writer;

pub(crate) use outbound_message::OutboundMessage;
pub(crate) use reader::{ReaderTaskHandle, spawn_reader_task};
pub(crate) use writer::{OUTBOUND_QUEUE_CAPACITY, WriterTaskHandle, spawn_writer_task};
