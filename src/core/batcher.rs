/// Regroups a stream of items into fixed-size batches.
///
/// Push-based so it can sit inside an async loop: `push` hands back a full
/// batch as soon as one is ready, `finish` returns the remainder. Batches are
/// never empty.
#[derive(Debug)]
pub struct Batcher<T> {
    batch_size: usize,
    pending: Vec<T>,
}

impl<T> Batcher<T> {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of items waiting for the current batch to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.pending.push(item);
        if self.pending.len() >= self.batch_size {
            Some(std::mem::replace(
                &mut self.pending,
                Vec::with_capacity(self.batch_size),
            ))
        } else {
            None
        }
    }

    /// Flushes the final, possibly short, batch.
    pub fn finish(&mut self) -> Option<Vec<T>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Iterator adapter over [`Batcher`].
pub struct Batches<I: Iterator> {
    inner: I,
    batcher: Batcher<I::Item>,
}

impl<I: Iterator> Iterator for Batches<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        for item in self.inner.by_ref() {
            if let Some(batch) = self.batcher.push(item) {
                return Some(batch);
            }
        }
        self.batcher.finish()
    }
}

pub trait BatchExt: Iterator + Sized {
    fn batches(self, batch_size: usize) -> Batches<Self> {
        Batches {
            inner: self,
            batcher: Batcher::new(batch_size),
        }
    }
}

impl<I: Iterator> BatchExt for I {}
