//! Iterator over the compressed `stsc` table, by chunk.

use super::boxes::{ChunkInfo, SampleToChunk};

/// Walks the sample-to-chunk table one chunk at a time.
pub struct ChunkInfoIterator<'a> {
    chunk_sample_index: u32,
    current_chunk: u32,
    table: &'a [ChunkInfo],
    entry_index: usize,
}

impl<'a> ChunkInfoIterator<'a> {
    pub fn new(sample_to_chunk: &'a SampleToChunk) -> Self {
        Self {
            chunk_sample_index: 0,
            current_chunk: if sample_to_chunk.chunk_info.is_empty() {
                0
            } else {
                sample_to_chunk.chunk_info[0].first_chunk
            },
            table: &sample_to_chunk.chunk_info,
            entry_index: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.entry_index < self.table.len()
    }

    /// Move to the next chunk.
    pub fn advance_chunk(&mut self) -> bool {
        if !self.is_valid() {
            return false;
        }
        self.current_chunk += 1;
        if let Some(next) = self.table.get(self.entry_index + 1) {
            if self.current_chunk >= next.first_chunk {
                self.entry_index += 1;
            }
        }
        self.chunk_sample_index = 0;
        self.is_valid()
    }

    /// Move to the next sample, advancing the chunk when it fills up.
    pub fn advance_sample(&mut self) -> bool {
        if !self.is_valid() {
            return false;
        }
        self.chunk_sample_index += 1;
        if self.chunk_sample_index >= self.samples_per_chunk() {
            return self.advance_chunk();
        }
        self.is_valid()
    }

    pub fn current_chunk(&self) -> u32 {
        self.current_chunk
    }

    pub fn samples_per_chunk(&self) -> u32 {
        self.table[self.entry_index].samples_per_chunk
    }

    pub fn sample_description_index(&self) -> u32 {
        self.table[self.entry_index].sample_description_index
    }

    /// Number of samples in chunks `start_chunk..=end_chunk` (1-based).
    pub fn num_samples(&self, start_chunk: u32, end_chunk: u32) -> u32 {
        let mut total = 0;
        for (i, entry) in self.table.iter().enumerate() {
            let run_end = self
                .table
                .get(i + 1)
                .map(|next| next.first_chunk)
                .unwrap_or(end_chunk + 1);
            let first = entry.first_chunk.max(start_chunk);
            let last = (run_end - 1).min(end_chunk);
            if first <= last {
                total += (last - first + 1) * entry.samples_per_chunk;
            }
        }
        total
    }

    /// The `first_chunk` of the last table entry.
    pub fn last_first_chunk(&self) -> u32 {
        self.table.last().map(|e| e.first_chunk).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SampleToChunk {
        SampleToChunk {
            chunk_info: vec![
                ChunkInfo {
                    first_chunk: 1,
                    samples_per_chunk: 3,
                    sample_description_index: 1,
                },
                ChunkInfo {
                    first_chunk: 3,
                    samples_per_chunk: 1,
                    sample_description_index: 1,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn walks_chunks() {
        let stsc = table();
        let mut iter = ChunkInfoIterator::new(&stsc);
        assert_eq!(iter.current_chunk(), 1);
        assert_eq!(iter.samples_per_chunk(), 3);

        assert!(iter.advance_chunk());
        assert_eq!(iter.current_chunk(), 2);
        assert_eq!(iter.samples_per_chunk(), 3);

        assert!(iter.advance_chunk());
        assert_eq!(iter.current_chunk(), 3);
        assert_eq!(iter.samples_per_chunk(), 1);
    }

    #[test]
    fn advances_by_sample() {
        let stsc = table();
        let mut iter = ChunkInfoIterator::new(&stsc);
        // Three samples in chunk 1; the third advance moves to chunk 2.
        assert!(iter.advance_sample());
        assert!(iter.advance_sample());
        assert_eq!(iter.current_chunk(), 1);
        assert!(iter.advance_sample());
        assert_eq!(iter.current_chunk(), 2);
    }

    #[test]
    fn counts_samples() {
        let stsc = table();
        let iter = ChunkInfoIterator::new(&stsc);
        // Chunks 1..=4: 3 + 3 + 1 + 1.
        assert_eq!(iter.num_samples(1, 4), 8);
        assert_eq!(iter.num_samples(2, 3), 4);
        assert_eq!(iter.last_first_chunk(), 3);
    }
}
