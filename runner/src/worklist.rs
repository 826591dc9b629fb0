use itertools::Itertools;
use std::{fs, io, path::Path};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkListError {
    #[error("Failed to read work list at {path}")]
    Unreadable {
        path: String,
        source: io::Error,
    },
    #[error("Work list contains no items")]
    Empty,
    #[error("Partition count must be at least 1")]
    NoPartitions,
    #[error("{partitions} partitions over {items} items would leave empty partitions")]
    TooManyPartitions { partitions: usize, items: usize },
}

/// Ordered list of work unit identifiers (HUCs), one per line in the source
/// file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkList {
    items: Vec<String>,
}

/// Contiguous slice of a work list, bound to one compute pool by its index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub items: Vec<String>,
}

impl WorkList {
    /// Read a work list from a line delimited file. Lines are taken verbatim,
    /// blank lines and comments are not part of the format.
    pub fn from_file(path: &Path) -> Result<Self, WorkListError> {
        let contents = fs::read_to_string(path).map_err(|source| WorkListError::Unreadable {
            path: path.to_string_lossy().into_owned(),
            source,
        })?;
        let items = contents.lines().map(str::to_owned).collect_vec();

        if items.is_empty() {
            return Err(WorkListError::Empty);
        }

        Ok(Self { items })
    }

    #[cfg(test)]
    pub(crate) fn from_items(items: Vec<String>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Split into `partitions` contiguous chunks of equal size, plus one
    /// remainder chunk for the leftover items when the division is not exact.
    /// Chunks keep the original item order. A split that would produce an
    /// empty chunk is rejected, the scheduler cannot run a zero task array
    /// job.
    pub fn partition(&self, partitions: usize) -> Result<Vec<Chunk>, WorkListError> {
        if partitions == 0 {
            return Err(WorkListError::NoPartitions);
        }
        if partitions > self.items.len() {
            return Err(WorkListError::TooManyPartitions {
                partitions,
                items: self.items.len(),
            });
        }

        let chunk_size = self.items.len() / partitions;
        let remainder = self.items.len() % partitions;
        let mut chunks = Vec::with_capacity(partitions + usize::from(remainder > 0));

        for index in 0..partitions {
            let start = index * chunk_size;
            chunks.push(Chunk {
                index,
                items: self.items[start..start + chunk_size].to_vec(),
            });
        }

        if remainder > 0 {
            chunks.push(Chunk {
                index: partitions,
                items: self.items[partitions * chunk_size..].to_vec(),
            });
        }

        Ok(chunks)
    }
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.items.len()
    }
}
