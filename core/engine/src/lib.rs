//! Record Flattener, Buffered Stream Processor, Persistence Engine, and
//! Message Dispatcher (§4.3, §4.6, §4.7, and the Dispatcher of §2) — the
//! half of the pipeline that sits between the wire message stream and the
//! `catalog` crate's reconciler/adapter.

pub mod dispatcher;
pub mod error;
pub mod flatten;
pub mod message;
pub mod processor;
pub mod persistence;

pub use dispatcher::Dispatcher;
pub use error::EngineError;
pub use flatten::{flatten_record, FlattenContext};
pub use message::Message;
pub use persistence::PersistenceEngine;
pub use processor::{BufferedRecord, RecordOutcome, StreamState};
