//! Fan-in of several streams into one, tagging each item with its source.
//!
//! Exactly one `next` is outstanding per source. Whichever source yields
//! first is emitted and only that source is re-armed, so items from one
//! source keep their order while sources interleave freely.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::FutureExt;
use futures::stream::{FusedStream, FuturesUnordered, Stream, StreamExt, StreamFuture};

/// An item together with the index of the source that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged<T> {
    pub index: usize,
    pub value: T,
}

/// The pending `next` of one source.
struct Armed<S> {
    index: usize,
    next: StreamFuture<S>,
}

impl<S: Stream + Unpin> Future for Armed<S> {
    type Output = (usize, Option<S::Item>, S);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let index = self.index;
        self.next
            .poll_unpin(cx)
            .map(|(item, stream)| (index, item, stream))
    }
}

/// Stream returned by [`combine_streams`].
pub struct CombineStreams<S> {
    pending: FuturesUnordered<Armed<S>>,
    sources: usize,
}

impl<S: Stream + Unpin> CombineStreams<S> {
    pub fn new() -> Self {
        Self {
            pending: FuturesUnordered::new(),
            sources: 0,
        }
    }

    /// Add a source; its items are tagged with the returned index.
    pub fn push(&mut self, source: S) -> usize {
        let index = self.sources;
        self.sources += 1;
        self.arm(index, source);
        index
    }

    /// Number of sources that have not finished yet.
    pub fn active(&self) -> usize {
        self.pending.len()
    }

    fn arm(&mut self, index: usize, source: S) {
        self.pending.push(Armed {
            index,
            next: source.into_future(),
        });
    }
}

impl<S: Stream + Unpin> Default for CombineStreams<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Stream + Unpin> Stream for CombineStreams<S> {
    type Item = Tagged<S::Item>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.pending.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(None),
                // That source is exhausted; keep waiting on the others.
                Poll::Ready(Some((_, None, _))) => continue,
                Poll::Ready(Some((index, Some(value), rest))) => {
                    self.arm(index, rest);
                    return Poll::Ready(Some(Tagged { index, value }));
                }
            }
        }
    }
}

impl<S: Stream + Unpin> FusedStream for CombineStreams<S> {
    fn is_terminated(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Merge `sources` into one stream of [`Tagged`] items. Index `i` refers to
/// `sources[i]`. The result ends once every source has ended.
pub fn combine_streams<S>(sources: impl IntoIterator<Item = S>) -> CombineStreams<S>
where
    S: Stream + Unpin,
{
    let mut combined = CombineStreams::new();
    for source in sources {
        combined.push(source);
    }
    combined
}
