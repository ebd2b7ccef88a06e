//! Streaming Reed-Solomon codec over shard files
//!
//! An object of `L` bytes is cut into `n` contiguous data shards of
//! `ceil(L / n)` bytes each, the last ones zero-padded. Parity shards are
//! computed block by block so memory use is bounded by
//! `(n + k) * CODEC_BLOCK_SIZE` regardless of object size. Joining writes the
//! data shards back in order and truncates to the recorded original size.
//!
//! All methods do blocking file I/O; async callers run them on
//! `tokio::task::spawn_blocking`.

use crate::{CoreError, Result};
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Bytes of each shard processed per step (1 MiB)
pub const CODEC_BLOCK_SIZE: usize = 1024 * 1024;

/// Upper bound on data + parity shards in GF(2^8)
pub const MAX_TOTAL_SHARDS: usize = 256;

/// Reed-Solomon codec splitting files into `n` data and `k` parity shards
pub struct StreamCodec {
    data_shards: usize,
    parity_shards: usize,
    // None when k = 0: plain striping
    rs: Option<ReedSolomon>,
}

impl StreamCodec {
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 {
            return Err(CoreError::Erasure("at least one data shard is required".into()));
        }
        if data_shards + parity_shards > MAX_TOTAL_SHARDS {
            return Err(CoreError::Erasure(format!(
                "{} + {} shards exceeds the maximum of {}",
                data_shards, parity_shards, MAX_TOTAL_SHARDS
            )));
        }
        let rs = if parity_shards > 0 {
            Some(ReedSolomon::new(data_shards, parity_shards)?)
        } else {
            None
        };
        Ok(Self {
            data_shards,
            parity_shards,
            rs,
        })
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Size of every shard for an object of `len` bytes
    pub fn shard_size(&self, len: u64) -> u64 {
        len.div_ceil(self.data_shards as u64)
    }

    /// Split `input` into `total_shards()` files, returning the input size
    pub fn split(&self, input: &Path, outputs: &[PathBuf]) -> Result<u64> {
        if outputs.len() != self.total_shards() {
            return Err(CoreError::Erasure(format!(
                "expected {} shard paths, got {}",
                self.total_shards(),
                outputs.len()
            )));
        }

        let mut source = File::open(input)?;
        let len = source.metadata()?.len();
        let shard_size = self.shard_size(len);

        let mut writers = outputs
            .iter()
            .map(|path| File::create(path).map(BufWriter::new))
            .collect::<std::io::Result<Vec<_>>>()?;

        let mut offset = 0u64;
        while offset < shard_size {
            let block = (shard_size - offset).min(CODEC_BLOCK_SIZE as u64) as usize;

            let mut data = Vec::with_capacity(self.data_shards);
            for i in 0..self.data_shards {
                let start = i as u64 * shard_size + offset;
                let mut buf = vec![0u8; block];
                if start < len {
                    let available = (len - start).min(block as u64) as usize;
                    source.seek(SeekFrom::Start(start))?;
                    source.read_exact(&mut buf[..available])?;
                }
                data.push(buf);
            }

            let mut parity = vec![vec![0u8; block]; self.parity_shards];
            if let Some(rs) = &self.rs {
                rs.encode_sep(&data[..], &mut parity[..])?;
            }

            for (writer, shard) in writers.iter_mut().zip(data.iter().chain(parity.iter())) {
                writer.write_all(shard)?;
            }
            offset += block as u64;
        }

        for writer in &mut writers {
            writer.flush()?;
        }
        Ok(len)
    }

    /// Rebuild the original object of `size` bytes into `output`.
    ///
    /// `shards[i]` is `None` for a shard that could not be fetched; up to
    /// `parity_shards()` may be missing.
    pub fn join(&self, shards: &[Option<PathBuf>], output: &Path, size: u64) -> Result<()> {
        if shards.len() != self.total_shards() {
            return Err(CoreError::Erasure(format!(
                "expected {} shard slots, got {}",
                self.total_shards(),
                shards.len()
            )));
        }
        // a shard of the wrong length is as good as missing
        let shard_size = self.shard_size(size);
        let mut readers = Vec::with_capacity(shards.len());
        for path in shards {
            let reader = match path {
                Some(path) => {
                    let file = File::open(path)?;
                    let actual = file.metadata()?.len();
                    if actual == shard_size {
                        Some(file)
                    } else {
                        warn!(
                            shard = %path.display(),
                            actual,
                            expected = shard_size,
                            "discarding shard with wrong size"
                        );
                        None
                    }
                }
                None => None,
            };
            readers.push(reader);
        }

        let have = readers.iter().filter(|r| r.is_some()).count();
        if have < self.data_shards {
            return Err(CoreError::InsufficientShards {
                have,
                need: self.data_shards,
            });
        }
        let data_missing = readers[..self.data_shards].iter().any(Option::is_none);

        let mut sink = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(output)?;

        let mut offset = 0u64;
        while offset < shard_size {
            let block = (shard_size - offset).min(CODEC_BLOCK_SIZE as u64) as usize;

            let mut blocks: Vec<Option<Vec<u8>>> = Vec::with_capacity(readers.len());
            for reader in readers.iter_mut() {
                match reader {
                    Some(file) => {
                        let mut buf = vec![0u8; block];
                        file.read_exact(&mut buf)?;
                        blocks.push(Some(buf));
                    }
                    None => blocks.push(None),
                }
            }

            if data_missing {
                let rs = self.rs.as_ref().ok_or(CoreError::InsufficientShards {
                    have,
                    need: self.data_shards,
                })?;
                rs.reconstruct_data(&mut blocks[..])?;
            }

            for (i, block_data) in blocks.iter().take(self.data_shards).enumerate() {
                let start = i as u64 * shard_size + offset;
                if start >= size {
                    break;
                }
                let Some(bytes) = block_data else {
                    return Err(CoreError::Erasure(format!("data shard {} not rebuilt", i)));
                };
                let wanted = (size - start).min(block as u64) as usize;
                sink.seek(SeekFrom::Start(start))?;
                sink.write_all(&bytes[..wanted])?;
            }
            offset += block as u64;
        }

        sink.set_len(size)?;
        sink.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn shard_paths(dir: &TempDir, count: usize) -> Vec<PathBuf> {
        (0..count).map(|i| dir.path().join(format!("shard.{}", i))).collect()
    }

    fn round_trip(data: &[u8], n: usize, k: usize, missing: &[usize]) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        std::fs::write(&input, data).unwrap();

        let codec = StreamCodec::new(n, k).unwrap();
        let paths = shard_paths(&dir, n + k);
        assert_eq!(codec.split(&input, &paths).unwrap(), data.len() as u64);

        let available: Vec<Option<PathBuf>> = paths
            .into_iter()
            .enumerate()
            .map(|(i, p)| if missing.contains(&i) { None } else { Some(p) })
            .collect();

        let output = dir.path().join("output");
        codec.join(&available, &output, data.len() as u64).unwrap();
        std::fs::read(&output).unwrap()
    }

    #[test]
    fn test_rejects_bad_layouts() {
        assert!(StreamCodec::new(0, 2).is_err());
        assert!(StreamCodec::new(200, 57).is_err());
        assert!(StreamCodec::new(200, 56).is_ok());
        assert!(StreamCodec::new(3, 0).is_ok());
    }

    #[test]
    fn test_shard_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        std::fs::write(&input, vec![1u8; 10]).unwrap();

        let codec = StreamCodec::new(4, 2).unwrap();
        let paths = shard_paths(&dir, 6);
        codec.split(&input, &paths).unwrap();
        for path in &paths {
            assert_eq!(std::fs::metadata(path).unwrap().len(), 3);
        }
        // last data shard holds bytes 9..10 plus two padding zeros
        assert_eq!(std::fs::read(&paths[3]).unwrap(), vec![1, 0, 0]);
    }

    #[test]
    fn test_empty_object() {
        assert!(round_trip(b"", 4, 2, &[]).is_empty());
        assert!(round_trip(b"", 4, 2, &[0, 5]).is_empty());
    }

    #[rstest]
    #[case(4, 2, &[0, 1])]
    #[case(4, 2, &[3, 4])]
    #[case(3, 3, &[0, 1, 2])]
    #[case(1, 1, &[0])]
    fn test_reconstructs_missing_shards(
        #[case] n: usize,
        #[case] k: usize,
        #[case] missing: &[usize],
    ) {
        let data: Vec<u8> = (0..100_003u32).map(|i| (i * 31 % 256) as u8).collect();
        assert_eq!(round_trip(&data, n, k, missing), data);
    }

    #[test]
    fn test_multi_block_object() {
        let data: Vec<u8> = (0..(3 * CODEC_BLOCK_SIZE + 17) as u32)
            .map(|i| (i % 253) as u8)
            .collect();
        assert_eq!(round_trip(&data, 2, 1, &[1]), data);
    }

    #[test]
    fn test_too_many_missing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        std::fs::write(&input, b"some object bytes").unwrap();

        let codec = StreamCodec::new(4, 2).unwrap();
        let paths = shard_paths(&dir, 6);
        codec.split(&input, &paths).unwrap();

        let shards = vec![None, None, None, Some(paths[3].clone()), Some(paths[4].clone()), Some(paths[5].clone())];
        let result = codec.join(&shards, &dir.path().join("out"), 17);
        assert!(matches!(
            result,
            Err(CoreError::InsufficientShards { have: 3, need: 4 })
        ));
    }

    #[test]
    fn test_truncated_shard_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&input, &data).unwrap();

        let codec = StreamCodec::new(4, 2).unwrap();
        let paths = shard_paths(&dir, 6);
        codec.split(&input, &paths).unwrap();

        // one short data shard and one lost parity shard still leave four
        let short = std::fs::read(&paths[1]).unwrap();
        std::fs::write(&paths[1], &short[..short.len() - 7]).unwrap();
        let mut shards: Vec<Option<PathBuf>> = paths.iter().cloned().map(Some).collect();
        shards[5] = None;

        let output = dir.path().join("out");
        codec.join(&shards, &output, data.len() as u64).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), data);

        // a second bad shard leaves too few
        std::fs::write(&paths[2], b"garbage").unwrap();
        let result = codec.join(&shards, &output, data.len() as u64);
        assert!(matches!(
            result,
            Err(CoreError::InsufficientShards { have: 3, need: 4 })
        ));
    }

    #[test]
    fn test_striping_without_parity() {
        let data = b"striped without parity shards".to_vec();
        assert_eq!(round_trip(&data, 3, 0, &[]), data);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_round_trip(
            data in proptest::collection::vec(any::<u8>(), 0..20_000),
            n in 1usize..8,
            k in 0usize..4,
            drop_seed in any::<u64>(),
        ) {
            let missing: Vec<usize> = (0..k)
                .map(|j| ((drop_seed >> (j * 8)) as usize + j) % (n + k))
                .collect();
            prop_assert_eq!(round_trip(&data, n, k, &missing), data);
        }
    }
}
