//! Chunk sequences returned by `stream`/`astream` wrappers.
//!
//! Chunks pass through untouched. The run closes when the sequence is
//! exhausted, yields an error item, or is dropped by the consumer.

use super::tracer::RunGuard;
use futures::Stream;
use serde::Serialize;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

fn observe<O, E>(run: &mut Option<RunGuard>, item: &Option<Result<O, E>>)
where
    O: Serialize,
    E: fmt::Display,
{
    match item {
        Some(Ok(chunk)) => {
            if let Some(run) = run.as_mut() {
                run.record_chunk(chunk);
            }
        }
        Some(Err(e)) => {
            if let Some(run) = run.take() {
                run.finish_err(e);
            }
        }
        None => {
            if let Some(run) = run.take() {
                run.finish_stream();
            }
        }
    }
}

pub struct TracedRunIter<S> {
    inner: S,
    run: Option<RunGuard>,
}

impl<S> TracedRunIter<S> {
    pub(crate) fn new(inner: S, run: RunGuard) -> Self {
        Self {
            inner,
            run: Some(run),
        }
    }

    /// Whether the run is still open
    pub fn is_open(&self) -> bool {
        self.run.is_some()
    }
}

impl<S, O, E> Iterator for TracedRunIter<S>
where
    S: Iterator<Item = Result<O, E>>,
    O: Serialize,
    E: fmt::Display,
{
    type Item = Result<O, E>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next();
        observe(&mut self.run, &item);
        item
    }
}

impl<S> Drop for TracedRunIter<S> {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            run.finish_stream();
        }
    }
}

pub struct TracedRunStream<St> {
    inner: Pin<Box<St>>,
    run: Option<RunGuard>,
}

impl<St> TracedRunStream<St> {
    pub(crate) fn new(inner: St, run: RunGuard) -> Self {
        Self {
            inner: Box::pin(inner),
            run: Some(run),
        }
    }

    pub fn is_open(&self) -> bool {
        self.run.is_some()
    }
}

impl<St, O, E> Stream for TracedRunStream<St>
where
    St: Stream<Item = Result<O, E>>,
    O: Serialize,
    E: fmt::Display,
{
    type Item = Result<O, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(item) => {
                observe(&mut this.run, &item);
                Poll::Ready(item)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<St> Drop for TracedRunStream<St> {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            run.finish_stream();
        }
    }
}
