//! Job queue processing

pub mod worker;

pub use worker::{SendJobPayload, SendWorker, SEND_JOB_MAX_ATTEMPTS, SEND_MESSAGE_QUEUE};
