//! Fixed-size block framing for the capture path.
//!
//! The device delivers buffers of whatever size the host picks.  The wire
//! wants one frame per `block_samples` samples, so [`BlockChunker`]
//! accumulates mono 16 kHz samples and cuts them into equal blocks, each
//! encoded to PCM16 and tagged with a sequence number.
//!
//! ```rust
//! use voice_stream::audio::BlockChunker;
//!
//! let mut chunker = BlockChunker::new(4);
//! let chunks = chunker.push(&[0.0; 10]);
//! assert_eq!(chunks.len(), 2);          // 8 samples framed
//! assert_eq!(chunker.pending(), 2);     // 2 samples wait for the next push
//! assert_eq!(chunks[1].seq, 1);
//! ```

use super::pcm;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// One encoded block of captured audio, the atomic unit of transport.
///
/// `data` holds PCM16 LE mono samples; `seq` increases by one per block
/// within a capture run so ordering can be checked end to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Position of this block in the capture run, starting at 0.
    pub seq: u64,
    /// PCM16 little-endian bytes.
    pub data: Vec<u8>,
}

impl AudioChunk {
    /// Number of samples in the block.
    pub fn samples(&self) -> usize {
        self.data.len() / pcm::BYTES_PER_SAMPLE
    }
}

// ---------------------------------------------------------------------------
// BlockChunker
// ---------------------------------------------------------------------------

/// Accumulates samples and emits fixed-size encoded blocks in order.
pub struct BlockChunker {
    block_samples: usize,
    pending: Vec<f32>,
    next_seq: u64,
}

impl BlockChunker {
    /// Create a chunker emitting blocks of `block_samples` samples.
    ///
    /// # Panics
    ///
    /// Panics if `block_samples == 0`.
    pub fn new(block_samples: usize) -> Self {
        assert!(block_samples > 0, "block size must be > 0");
        Self {
            block_samples,
            pending: Vec::with_capacity(block_samples * 2),
            next_seq: 0,
        }
    }

    /// Append `samples` and return every block that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioChunk> {
        self.pending.extend_from_slice(samples);

        let full = self.pending.len() / self.block_samples;
        if full == 0 {
            return Vec::new();
        }

        let framed = full * self.block_samples;
        let chunks = self.pending[..framed]
            .chunks_exact(self.block_samples)
            .map(|block| {
                let chunk = AudioChunk {
                    seq: self.next_seq,
                    data: pcm::encode(block),
                };
                self.next_seq += 1;
                chunk
            })
            .collect();

        self.pending.drain(..framed);
        chunks
    }

    /// Samples waiting for the next block.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_pushes_accumulate_until_a_block_is_full() {
        let mut chunker = BlockChunker::new(4_096);
        for _ in 0..7 {
            assert!(chunker.push(&[0.1; 512]).is_empty());
        }
        let chunks = chunker.push(&[0.1; 512]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples(), 4_096);
        assert_eq!(chunks[0].data.len(), 8_192);
        assert_eq!(chunker.pending(), 0);
    }

    #[test]
    fn large_push_emits_several_blocks_in_order() {
        let mut chunker = BlockChunker::new(3);
        let input = [0.1, 0.2, 0.3, -0.1, -0.2, -0.3, 0.5];
        let chunks = chunker.push(&input);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].seq, 0);
        assert_eq!(chunks[1].seq, 1);
        assert_eq!(chunks[0].data, pcm::encode(&input[0..3]));
        assert_eq!(chunks[1].data, pcm::encode(&input[3..6]));
        assert_eq!(chunker.pending(), 1);
    }

    #[test]
    fn sequence_continues_across_pushes() {
        let mut chunker = BlockChunker::new(2);
        let first = chunker.push(&[0.0; 3]);
        let second = chunker.push(&[0.0; 3]);
        let seqs: Vec<u64> = first.iter().chain(second.iter()).map(|c| c.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn leftover_samples_lead_the_next_block() {
        let mut chunker = BlockChunker::new(2);
        chunker.push(&[1.0]);
        let chunks = chunker.push(&[-1.0]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data, pcm::encode(&[1.0, -1.0]));
    }

    #[test]
    #[should_panic(expected = "block size must be > 0")]
    fn zero_block_panics() {
        let _ = BlockChunker::new(0);
    }
}
