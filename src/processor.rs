//! User-supplied envelope filters/mutators applied before transmission.
//!
//! A processor that panics has that panic caught and swallowed: the
//! envelope it was working on is kept as-is and the remaining processors
//! in the chain still run on it (`SPEC_FULL.md` §4.5/§9). This mirrors the
//! upstream behaviour of logging and moving on when a user-supplied
//! processor callback raises.

use std::panic::{self, AssertUnwindSafe};

use log::warn;

use crate::envelope::Envelope;

/// What a processor decided about one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorOutcome {
    Keep,
    Drop,
}

/// A single telemetry processor.
pub trait Processor: Send + Sync {
    fn process(&self, envelope: &mut Envelope) -> ProcessorOutcome;
}

impl<F> Processor for F
where
    F: Fn(&mut Envelope) -> ProcessorOutcome + Send + Sync,
{
    fn process(&self, envelope: &mut Envelope) -> ProcessorOutcome {
        self(envelope)
    }
}

/// An ordered sequence of processors applied to every outgoing batch.
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn Processor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, processor: Box<dyn Processor>) {
        self.processors.push(processor);
    }

    pub fn clear(&mut self) {
        self.processors.clear();
    }

    /// Run the chain over `envelopes`, dropping any envelope that any
    /// processor marks `Drop`. Once an envelope is dropped it is not
    /// offered to the remaining processors. Output preserves input order
    /// minus drops.
    ///
    /// A processor that panics is treated as if it had raised and been
    /// caught: the panic is swallowed, the envelope it was handling is
    /// kept untouched, and the chain moves on to the next processor.
    pub fn apply(&self, envelopes: Vec<Envelope>) -> Vec<Envelope> {
        envelopes
            .into_iter()
            .filter_map(|mut envelope| {
                for processor in &self.processors {
                    match panic::catch_unwind(AssertUnwindSafe(|| processor.process(&mut envelope))) {
                        Ok(ProcessorOutcome::Drop) => return None,
                        Ok(ProcessorOutcome::Keep) => {}
                        Err(panic) => {
                            warn!("processor panicked; keeping envelope and continuing chain: {}", panic_message(&panic));
                        }
                    }
                }
                Some(envelope)
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
