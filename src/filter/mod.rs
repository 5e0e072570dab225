//! Value transforms applied around the handler

#[cfg(test)]
mod filter_test;

mod byte_filter;
mod string_filter;

pub use byte_filter::ByteFilter;
pub use string_filter::StringFilter;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::handler::Message;
use crate::session::Session;

/// An encode/decode pair with no I/O side effects.
///
/// Returning `Ok(None)` stops the value from travelling further in that
/// direction. Values of a type the filter does not handle should be passed
/// through unchanged.
pub trait Filter: Send + Sync {
    /// Name used in error reports
    fn name(&self) -> &str;

    /// Outbound transform
    fn encode(&self, session: &Session, msg: Message) -> Result<Option<Message>>;

    /// Inbound transform
    fn decode(&self, session: &Session, msg: Message) -> Result<Option<Message>>;
}

/// Ordered filters. Decode runs front to back, encode back to front, so the
/// pairing behaves like nested envelopes.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    /// Creates an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter at the back of the chain
    pub fn add_back(&mut self, filter: impl Filter + 'static) -> &mut Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Number of filters
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the chain has no filters
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Runs every decode in chain order
    pub fn decode(&self, session: &Session, msg: Message) -> Result<Option<Message>> {
        let mut value = msg;
        for filter in self.filters.iter() {
            match filter.decode(session, value) {
                Ok(Some(next)) => value = next,
                Ok(None) => return Ok(None),
                Err(err) => return Err(Self::failed(filter.as_ref(), err)),
            }
        }
        Ok(Some(value))
    }

    /// Runs every encode in reverse chain order
    pub fn encode(&self, session: &Session, msg: Message) -> Result<Option<Message>> {
        let mut value = msg;
        for filter in self.filters.iter().rev() {
            match filter.encode(session, value) {
                Ok(Some(next)) => value = next,
                Ok(None) => return Ok(None),
                Err(err) => return Err(Self::failed(filter.as_ref(), err)),
            }
        }
        Ok(Some(value))
    }

    fn failed(filter: &dyn Filter, err: Error) -> Error {
        match err {
            Error::Filter { .. } => err,
            err => Error::Filter {
                filter: filter.name().to_string(),
                message: err.to_string(),
            },
        }
    }
}
